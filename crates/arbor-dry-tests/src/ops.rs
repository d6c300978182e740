// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operator fixtures: sums over `i64`/`u64` that fail, panic, or count calls.

use arbor_core::{OpError, ReduceOp};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Integer sum that returns an [`OpError`] on one chosen argument, or from
/// `finalize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingOp {
    fail_on: Option<i64>,
    fail_finalize: bool,
}

impl FailingOp {
    /// Fails when reducing `value`.
    pub fn on(value: i64) -> Self {
        Self {
            fail_on: Some(value),
            fail_finalize: false,
        }
    }

    /// Fails in `finalize`, so even an empty reduction errors.
    pub fn in_finalize() -> Self {
        Self {
            fail_on: None,
            fail_finalize: true,
        }
    }
}

impl ReduceOp for FailingOp {
    type Result = i64;
    type Argument = i64;

    fn identity(&self) -> i64 {
        0
    }

    fn merge(&self, result: &mut i64, other: i64) -> Result<(), OpError> {
        *result += other;
        Ok(())
    }

    fn reduce(&self, result: &mut i64, arg: &i64) -> Result<(), OpError> {
        if self.fail_on == Some(*arg) {
            return Err(OpError::new(format!("refusing argument {arg}")));
        }
        *result += arg;
        Ok(())
    }

    fn finalize(&self, result: i64) -> Result<i64, OpError> {
        if self.fail_finalize {
            return Err(OpError::new("finalize refused"));
        }
        Ok(result)
    }
}

/// Integer sum that panics on one chosen argument, or from `finalize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingOp {
    panic_on: Option<i64>,
    panic_finalize: bool,
}

impl PanickingOp {
    /// Panics with `"boom on {value}"` when reducing `value`.
    pub fn on(value: i64) -> Self {
        Self {
            panic_on: Some(value),
            panic_finalize: false,
        }
    }

    /// Panics with `"boom in finalize"`.
    pub fn in_finalize() -> Self {
        Self {
            panic_on: None,
            panic_finalize: true,
        }
    }
}

impl ReduceOp for PanickingOp {
    type Result = i64;
    type Argument = i64;

    fn identity(&self) -> i64 {
        0
    }

    fn merge(&self, result: &mut i64, other: i64) -> Result<(), OpError> {
        *result += other;
        Ok(())
    }

    #[allow(clippy::panic)]
    fn reduce(&self, result: &mut i64, arg: &i64) -> Result<(), OpError> {
        if self.panic_on == Some(*arg) {
            panic!("boom on {arg}");
        }
        *result += arg;
        Ok(())
    }

    #[allow(clippy::panic)]
    fn finalize(&self, result: i64) -> Result<i64, OpError> {
        if self.panic_finalize {
            panic!("boom in finalize");
        }
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct Calls {
    reduce: AtomicUsize,
    reduce_pair: AtomicUsize,
    merge: AtomicUsize,
    finalize: AtomicUsize,
}

/// `u64` sum that counts how often each operator entry point runs.
///
/// Clones share counters, so keep one clone to inspect after moving the
/// other into a reduction.
#[derive(Debug, Clone, Default)]
pub struct CountingSum {
    calls: Arc<Calls>,
}

impl CountingSum {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-argument folds.
    pub fn reduces(&self) -> usize {
        self.calls.reduce.load(Ordering::SeqCst)
    }

    /// Two-argument folds.
    pub fn pair_reduces(&self) -> usize {
        self.calls.reduce_pair.load(Ordering::SeqCst)
    }

    /// Partial-result merges.
    pub fn merges(&self) -> usize {
        self.calls.merge.load(Ordering::SeqCst)
    }

    /// Finalize calls; exactly one per completed reduction.
    pub fn finalizes(&self) -> usize {
        self.calls.finalize.load(Ordering::SeqCst)
    }

    /// Arguments folded, counting a pair fold as two.
    pub fn arguments_folded(&self) -> usize {
        self.reduces() + 2 * self.pair_reduces()
    }
}

impl ReduceOp for CountingSum {
    type Result = u64;
    type Argument = u64;

    fn identity(&self) -> u64 {
        0
    }

    fn merge(&self, result: &mut u64, other: u64) -> Result<(), OpError> {
        self.calls.merge.fetch_add(1, Ordering::SeqCst);
        *result += other;
        Ok(())
    }

    fn reduce(&self, result: &mut u64, arg: &u64) -> Result<(), OpError> {
        self.calls.reduce.fetch_add(1, Ordering::SeqCst);
        *result += arg;
        Ok(())
    }

    fn reduce_pair(&self, result: &mut u64, first: &u64, second: &u64) -> Result<(), OpError> {
        self.calls.reduce_pair.fetch_add(1, Ordering::SeqCst);
        *result += first + second;
        Ok(())
    }

    fn finalize(&self, result: u64) -> Result<u64, OpError> {
        self.calls.finalize.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn failing_op_rejects_only_its_value() {
        let op = FailingOp::on(3);
        let mut acc = op.identity();
        op.reduce(&mut acc, &1).unwrap();
        assert_eq!(op.reduce(&mut acc, &3).unwrap_err().message(), "refusing argument 3");
        assert!(FailingOp::in_finalize().finalize(0).is_err());
    }

    #[test]
    fn counting_sum_shares_counters_across_clones() {
        let op = CountingSum::new();
        let view = op.clone();
        let mut acc = op.identity();
        op.reduce(&mut acc, &1).unwrap();
        op.reduce_pair(&mut acc, &2, &3).unwrap();
        op.merge(&mut acc, 4).unwrap();
        assert_eq!(op.finalize(acc).unwrap(), 10);
        assert_eq!(view.arguments_folded(), 3);
        assert_eq!((view.merges(), view.finalizes()), (1, 1));
    }
}
