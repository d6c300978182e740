// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler whose tasks run only when the test says so.

use arbor_core::{Priority, ScheduleError, Scheduler, Task};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::rng::XorShift64;

/// Queues every scheduled task until the test drives it.
///
/// Clones share one queue: give one clone to the reduction and keep another
/// to run tasks with [`run_all`](Self::run_all) or
/// [`run_shuffled`](Self::run_shuffled).
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    queue: Vec<Task>,
    capacity: Option<usize>,
    shut_down: bool,
    accepted: usize,
    high_priority: usize,
}

impl ManualScheduler {
    /// Unbounded scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler that refuses tasks with [`ScheduleError::QueueFull`] while
    /// `capacity` tasks are queued.
    pub fn with_capacity(capacity: usize) -> Self {
        let sched = Self::new();
        sched.lock().capacity = Some(capacity);
        sched
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every later task with [`ScheduleError::ShutDown`].
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
    }

    /// Tasks queued and not yet run.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Tasks accepted so far.
    pub fn accepted(&self) -> usize {
        self.lock().accepted
    }

    /// Accepted tasks that asked for [`Priority::High`].
    pub fn high_priority(&self) -> usize {
        self.lock().high_priority
    }

    /// Runs the oldest queued task. Returns false when the queue was empty.
    pub fn run_next(&self) -> bool {
        let task = {
            let mut inner = self.lock();
            if inner.queue.is_empty() {
                return false;
            }
            inner.queue.remove(0)
        };
        task();
        true
    }

    /// Runs tasks oldest-first until none remain, including tasks scheduled
    /// along the way. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Runs tasks in `rng`-chosen order until none remain. Returns how many
    /// ran.
    pub fn run_shuffled(&self, rng: &mut XorShift64) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut inner = self.lock();
                if inner.queue.is_empty() {
                    return ran;
                }
                let ix = rng.below(inner.queue.len());
                inner.queue.swap_remove(ix)
            };
            task();
            ran += 1;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: Task, priority: Priority) -> Result<(), ScheduleError> {
        let mut inner = self.lock();
        if inner.shut_down {
            return Err(ScheduleError::ShutDown);
        }
        if let Some(capacity) = inner.capacity {
            if inner.queue.len() >= capacity {
                return Err(ScheduleError::QueueFull { capacity });
            }
        }
        inner.accepted += 1;
        if priority == Priority::High {
            inner.high_priority += 1;
        }
        inner.queue.push(task);
        Ok(())
    }
}
