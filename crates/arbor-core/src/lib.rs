// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! arbor-core: asynchronous arrival-order reduction.
//!
//! A [`ReduceTask`] collects arguments that may not exist yet
//! ([`AsyncValue`]s) and folds them with a [`ReduceOp`] in the order they
//! resolve. Two ready inputs are merged by a task on the supplied
//! [`Scheduler`]; the merged result goes back into play, so the reduction
//! tree is shaped by arrival order rather than argument order. No thread
//! ever blocks waiting for a particular argument.
//!
//! ```
//! use std::sync::Arc;
//! use arbor_core::{AsyncValue, ReduceTask, Sum, WorkerPool};
//!
//! let pool = Arc::new(WorkerPool::with_workers(4)?);
//! let values: Vec<AsyncValue<u64>> = (0..8).map(|_| AsyncValue::new()).collect();
//!
//! let mut task = ReduceTask::new(Sum::<u64>::default(), Arc::clone(&pool));
//! for value in &values {
//!     task.add(value.clone())?;
//! }
//! let future = task.submit();
//!
//! // Resolve in reverse; the result does not depend on the order.
//! for (i, value) in values.iter().enumerate().rev() {
//!     value.set(i as u64)?;
//! }
//! assert_eq!(future.wait(), Ok(&28));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Pool configuration and the config storage port.
pub mod config;
mod coordinator;
mod error;
mod op;
/// Built-in reduction operators.
pub mod ops;
mod pending;
mod pool;
mod sched;
mod task;
mod value;

pub use config::{
    ConfigError, ConfigService, ConfigStore, PoolConfig, DEFAULT_THREAD_NAME, POOL_CONFIG_KEY,
};
pub use coordinator::Progress;
pub use error::{AsyncValueError, OpError, PoolError, ReduceError, ScheduleError};
pub use op::{PairOp, PairReduceOp, ReduceOp};
pub use ops::{BitAnd, BitOr, DotProduct, Max, Min, Sum};
pub use pending::{ArgPair, Deferred};
pub use pool::WorkerPool;
pub use sched::{Inline, Priority, Scheduler, Task};
pub use task::{ReduceFuture, ReducePairTask, ReduceTask};
pub use value::{AsyncValue, Callback, Resolved};
