// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types shared by the reduction engine and its collaborators.
//!
//! Every error here is `Clone`: a failed reduction stores one [`ReduceError`]
//! in its shared result slot and hands a copy to each observer.

use std::fmt;

use thiserror::Error;

/// Failure reported by a user-supplied reduction operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OpError {
    message: String,
}

impl OpError {
    /// Creates an operator error from anything printable.
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for OpError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for OpError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A scheduler refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The bounded queue already holds `capacity` tasks.
    #[error("scheduler queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// The scheduler no longer accepts work.
    #[error("scheduler has shut down")]
    ShutDown,
}

/// Misuse of a single-assignment [`AsyncValue`](crate::AsyncValue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AsyncValueError {
    /// `set` was called on a value that already resolved.
    #[error("async value already set")]
    AlreadySet,
}

/// Why a reduction failed to produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    /// The operator returned an error from `merge`, `reduce` or `finalize`.
    #[error("reduction operator failed: {0}")]
    Operator(#[from] OpError),
    /// The operator panicked; the payload message is preserved when it is a string.
    #[error("reduction operator panicked: {0}")]
    Panicked(String),
    /// A merge task could not be scheduled.
    #[error("merge task could not be scheduled: {0}")]
    Schedule(#[from] ScheduleError),
}

impl ReduceError {
    /// Converts a caught panic payload into [`ReduceError::Panicked`].
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }
}

/// Failure to bring up a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// `workers` was configured as zero.
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_keep_their_message() {
        let err = ReduceError::from_panic(&"boom");
        assert_eq!(err, ReduceError::Panicked("boom".into()));

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        let err = ReduceError::from_panic(owned.as_ref());
        assert_eq!(err, ReduceError::Panicked("owned boom".into()));

        let opaque: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        let err = ReduceError::from_panic(opaque.as_ref());
        assert_eq!(err, ReduceError::Panicked("non-string panic payload".into()));
    }

    #[test]
    fn display_includes_cause() {
        let err = ReduceError::from(OpError::new("length mismatch"));
        assert_eq!(err.to_string(), "reduction operator failed: length mismatch");

        let err = ReduceError::from(ScheduleError::QueueFull { capacity: 4 });
        assert_eq!(
            err.to_string(),
            "merge task could not be scheduled: scheduler queue is full (capacity 4)"
        );
    }
}
