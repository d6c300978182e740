// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reduction operator traits and the pairwise adapter.
//!
//! # Algebraic contract
//!
//! Arguments are folded in arrival order, which differs between runs. The
//! final value is only reproducible when the operator is associative and
//! commutative over its accumulator (a commutative monoid with
//! [`identity`](ReduceOp::identity) as the unit).

use crate::error::OpError;
use crate::pending::ArgPair;

/// Capability set the coordinator needs from a reduction operator.
///
/// Every method may run on any worker thread and concurrently with other
/// methods of the same operator instance, so implementations take `&self`
/// and keep their state in `result`.
///
/// A panic in any method is caught and reported as
/// [`ReduceError::Panicked`](crate::ReduceError::Panicked).
pub trait ReduceOp: Send + Sync + 'static {
    /// Accumulator type.
    type Result: Send + Sync + 'static;
    /// Type of a single resolved argument.
    type Argument: Send + Sync + 'static;

    /// Creates an empty accumulator.
    fn identity(&self) -> Self::Result;

    /// Folds another partial result into `result`.
    fn merge(&self, result: &mut Self::Result, other: Self::Result) -> Result<(), OpError>;

    /// Folds one argument into `result`.
    fn reduce(&self, result: &mut Self::Result, arg: &Self::Argument) -> Result<(), OpError>;

    /// Folds two arguments into a fresh accumulator.
    ///
    /// Called when two arguments become ready while no partial result is
    /// available. Override when combining two arguments at once is cheaper
    /// than two separate folds.
    fn reduce_pair(
        &self,
        result: &mut Self::Result,
        first: &Self::Argument,
        second: &Self::Argument,
    ) -> Result<(), OpError> {
        self.reduce(result, first)?;
        self.reduce(result, second)
    }

    /// Post-processing applied exactly once to the final accumulator.
    fn finalize(&self, result: Self::Result) -> Result<Self::Result, OpError> {
        Ok(result)
    }
}

/// Operator over co-indexed `(left, right)` argument pairs, e.g. a dot
/// product over vector pairs.
///
/// Wrap it in [`PairOp`] (or use [`ReducePairTask`](crate::ReducePairTask))
/// to drive it through the ordinary reduction engine.
pub trait PairReduceOp: Send + Sync + 'static {
    /// Accumulator type.
    type Result: Send + Sync + 'static;
    /// Left-hand argument type.
    type Left: Send + Sync + 'static;
    /// Right-hand argument type.
    type Right: Send + Sync + 'static;

    /// Creates an empty accumulator.
    fn identity(&self) -> Self::Result;

    /// Folds another partial result into `result`.
    fn merge(&self, result: &mut Self::Result, other: Self::Result) -> Result<(), OpError>;

    /// Folds one argument pair into `result`.
    fn reduce(
        &self,
        result: &mut Self::Result,
        left: &Self::Left,
        right: &Self::Right,
    ) -> Result<(), OpError>;

    /// Folds two argument pairs into `result`.
    fn reduce_two(
        &self,
        result: &mut Self::Result,
        first: (&Self::Left, &Self::Right),
        second: (&Self::Left, &Self::Right),
    ) -> Result<(), OpError> {
        self.reduce(result, first.0, first.1)?;
        self.reduce(result, second.0, second.1)
    }

    /// Post-processing applied exactly once to the final accumulator.
    fn finalize(&self, result: Self::Result) -> Result<Self::Result, OpError> {
        Ok(result)
    }
}

/// Presents a [`PairReduceOp`] as a [`ReduceOp`] whose argument is an
/// [`ArgPair`].
#[derive(Debug, Clone, Default)]
pub struct PairOp<P> {
    inner: P,
}

impl<P> PairOp<P> {
    /// Wraps a pairwise operator.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// Returns the wrapped operator.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: PairReduceOp> ReduceOp for PairOp<P> {
    type Result = P::Result;
    type Argument = ArgPair<P::Left, P::Right>;

    fn identity(&self) -> Self::Result {
        self.inner.identity()
    }

    fn merge(&self, result: &mut Self::Result, other: Self::Result) -> Result<(), OpError> {
        self.inner.merge(result, other)
    }

    fn reduce(&self, result: &mut Self::Result, arg: &Self::Argument) -> Result<(), OpError> {
        let (left, right) = arg.resolved()?;
        self.inner.reduce(result, left, right)
    }

    fn reduce_pair(
        &self,
        result: &mut Self::Result,
        first: &Self::Argument,
        second: &Self::Argument,
    ) -> Result<(), OpError> {
        self.inner
            .reduce_two(result, first.resolved()?, second.resolved()?)
    }

    fn finalize(&self, result: Self::Result) -> Result<Self::Result, OpError> {
        self.inner.finalize(result)
    }
}
