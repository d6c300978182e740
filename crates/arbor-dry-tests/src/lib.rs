// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Arbor crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`ops`] - Operator fixtures (failing, panicking, call-counting)
//! - [`probe`] - Callback firing recorder
//! - [`rng`] - Deterministic PRNG and shuffling
//! - [`sched`] - Manually driven scheduler

pub mod config;
pub mod ops;
pub mod probe;
pub mod rng;
pub mod sched;

// Re-export commonly used items at crate root for convenience
pub use config::InMemoryConfigStore;
pub use ops::{CountingSum, FailingOp, PanickingOp};
pub use probe::CallbackProbe;
pub use rng::{shuffle, XorShift64, SEEDS, WORKER_COUNTS};
pub use sched::ManualScheduler;
