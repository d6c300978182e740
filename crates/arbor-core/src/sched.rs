// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler port used by the coordinator to run merge tasks.
//!
//! The engine only needs "run this closure exactly once, somewhere, later".
//! [`WorkerPool`](crate::WorkerPool) is the shipped multi-threaded
//! implementation; [`Inline`] runs the task on the calling thread.

use std::sync::Arc;

use crate::error::ScheduleError;

/// A unit of scheduled work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling hint attached to every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Ordinary work, queued behind everything already waiting.
    #[default]
    Normal,
    /// Run ahead of queued ordinary work. Merge tasks use this so partial
    /// results are folded before new producers start.
    High,
}

/// Executes tasks on some thread at some later time.
///
/// Implementations must run every accepted task exactly once. The priority
/// is a hint; ignoring it is always correct.
pub trait Scheduler: Send + Sync + 'static {
    /// Queues `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns a [`ScheduleError`] if the task was not accepted. A rejected
    /// task is dropped without running.
    fn schedule(&self, task: Task, priority: Priority) -> Result<(), ScheduleError>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    #[inline]
    fn schedule(&self, task: Task, priority: Priority) -> Result<(), ScheduleError> {
        (**self).schedule(task, priority)
    }
}

impl<S: Scheduler + ?Sized> Scheduler for &'static S {
    #[inline]
    fn schedule(&self, task: Task, priority: Priority) -> Result<(), ScheduleError> {
        (**self).schedule(task, priority)
    }
}

/// Runs every task immediately on the calling thread.
///
/// Used for zero-argument reductions and for deterministic single-threaded
/// tests. Merges triggered from a value's completion callback run on the
/// thread that resolved the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Scheduler for Inline {
    #[inline]
    fn schedule(&self, task: Task, _priority: Priority) -> Result<(), ScheduleError> {
        task();
        Ok(())
    }
}

/// Merge tasks go to tokio's blocking pool; they are CPU-bound and never
/// await.
///
/// A runtime that has shut down cancels the task inside `spawn_blocking`;
/// that is reported as [`ScheduleError::ShutDown`].
#[cfg(feature = "tokio")]
impl Scheduler for tokio::runtime::Handle {
    fn schedule(&self, task: Task, _priority: Priority) -> Result<(), ScheduleError> {
        use std::sync::atomic::{AtomicBool, Ordering};

        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let join = self.spawn_blocking(move || {
            flag.store(true, Ordering::Release);
            task();
        });
        if join.is_finished() && !started.load(Ordering::Acquire) {
            return Err(ScheduleError::ShutDown);
        }
        Ok(())
    }
}
