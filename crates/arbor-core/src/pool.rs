// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-size thread pool implementing [`Scheduler`].
//!
//! Workers share one queue. [`Priority::High`] tasks jump to the front,
//! [`Priority::Normal`] tasks join the back. Each worker loops claiming the
//! next task until the pool shuts down and the queue is drained.
//!
//! # Panics in tasks
//!
//! A panicking task is caught, logged, and counted; the worker keeps
//! serving the queue. The coordinator catches operator panics itself, so a
//! task panic that reaches the pool indicates a bug in caller-supplied
//! closures.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error, trace};

use crate::config::PoolConfig;
use crate::error::{PoolError, ScheduleError};
use crate::sched::{Priority, Scheduler, Task};

struct Queue {
    tasks: VecDeque<Task>,
    running: usize,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a task is queued or shutdown begins.
    available: Condvar,
    /// Signalled when the pool becomes idle.
    idle: Condvar,
    capacity: Option<usize>,
    panicked: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Multi-threaded [`Scheduler`] backed by a shared task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns the workers described by `config`.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoWorkers`] if `config.workers == 0`;
    /// [`PoolError::Spawn`] if a thread could not be created (workers that
    /// did start are shut down again).
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                running: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            capacity: config.queue_capacity,
            panicked: AtomicUsize::new(0),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.workers),
        };
        for ix in 0..config.workers {
            let shared = Arc::clone(&pool.shared);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{ix}", config.thread_name))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                // Dropping `pool` joins the workers that did start.
                Err(err) => return Err(PoolError::Spawn(err.to_string())),
            }
        }
        debug!(
            workers = config.workers,
            capacity = ?config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Pool with `workers` threads and an unbounded queue.
    pub fn with_workers(workers: usize) -> Result<Self, PoolError> {
        Self::new(&PoolConfig::with_workers(workers))
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting in the queue (not counting running ones).
    pub fn queued(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Number of tasks whose panic was caught by a worker.
    pub fn panicked(&self) -> usize {
        self.shared.panicked.load(Ordering::Acquire)
    }

    /// Blocks until the queue is empty and no task is running.
    ///
    /// Tasks scheduled by running tasks are waited for as well.
    pub fn wait_idle(&self) {
        let mut queue = self.shared.lock();
        while !(queue.tasks.is_empty() && queue.running == 0) {
            queue = self
                .shared
                .idle
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops accepting work, drains the queue, and joins every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.available.notify_all();
        let current = std::thread::current().id();
        for handle in self.workers.drain(..) {
            // The last handle can be dropped by one of the pool's own tasks;
            // that worker exits on its own once the queue drains.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Scheduler for WorkerPool {
    fn schedule(&self, task: Task, priority: Priority) -> Result<(), ScheduleError> {
        {
            let mut queue = self.shared.lock();
            if queue.shutdown {
                return Err(ScheduleError::ShutDown);
            }
            if let Some(capacity) = self.shared.capacity {
                if queue.tasks.len() >= capacity {
                    return Err(ScheduleError::QueueFull { capacity });
                }
            }
            match priority {
                Priority::High => queue.tasks.push_front(task),
                Priority::Normal => queue.tasks.push_back(task),
            }
            trace!(?priority, queued = queue.tasks.len(), "task queued");
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    queue.running += 1;
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            shared.panicked.fetch_add(1, Ordering::AcqRel);
            error!("scheduled task panicked; worker continues");
        }

        let mut queue = shared.lock();
        queue.running -= 1;
        if queue.running == 0 && queue.tasks.is_empty() {
            shared.idle.notify_all();
        }
    }
}
