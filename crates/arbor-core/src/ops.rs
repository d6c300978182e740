// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Built-in reduction operators.
//!
//! # Algebraic Categories
//!
//! Every operator here is a commutative monoid, so its result does not
//! depend on the order in which arguments resolve:
//! - [`Sum`], [`Max`], [`Min`] over any suitable scalar
//! - [`BitOr`], [`BitAnd`] over `u64`
//! - [`DotProduct`] over pairs of `Vec<f64>` (pairwise; use with
//!   [`ReducePairTask`](crate::ReducePairTask))
//!
//! Floating-point addition is only approximately associative; sums of
//! floats may differ in the last bits between runs.
//!
//! # Empty Input Behavior
//!
//! - [`Sum`] returns `T::default()`
//! - [`Max`] and [`Min`] return `None`
//! - [`BitOr`] returns `0`, [`BitAnd`] returns `u64::MAX`
//! - [`DotProduct`] returns `0.0`

use std::fmt;
use std::marker::PhantomData;
use std::ops::AddAssign;

use crate::error::OpError;
use crate::op::{PairReduceOp, ReduceOp};

macro_rules! marker_impls {
    ($name:ident) => {
        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self(PhantomData)
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>", stringify!($name), std::any::type_name::<T>())
            }
        }
    };
}

/// Sum of all arguments.
pub struct Sum<T>(PhantomData<fn() -> T>);

/// Largest argument (by `PartialOrd`). Incomparable values such as `NaN`
/// never replace the current maximum.
pub struct Max<T>(PhantomData<fn() -> T>);

/// Smallest argument (by `PartialOrd`). Incomparable values such as `NaN`
/// never replace the current minimum.
pub struct Min<T>(PhantomData<fn() -> T>);

marker_impls!(Sum);
marker_impls!(Max);
marker_impls!(Min);

impl<T> ReduceOp for Sum<T>
where
    T: Default + Clone + AddAssign + Send + Sync + 'static,
{
    type Result = T;
    type Argument = T;

    fn identity(&self) -> T {
        T::default()
    }

    fn merge(&self, result: &mut T, other: T) -> Result<(), OpError> {
        *result += other;
        Ok(())
    }

    fn reduce(&self, result: &mut T, arg: &T) -> Result<(), OpError> {
        *result += arg.clone();
        Ok(())
    }
}

fn keep_if<T: Clone>(result: &mut Option<T>, candidate: &T, better: impl Fn(&T, &T) -> bool) {
    match result {
        Some(current) if !better(candidate, current) => {}
        _ => *result = Some(candidate.clone()),
    }
}

impl<T> ReduceOp for Max<T>
where
    T: PartialOrd + Clone + Send + Sync + 'static,
{
    type Result = Option<T>;
    type Argument = T;

    fn identity(&self) -> Option<T> {
        None
    }

    fn merge(&self, result: &mut Option<T>, other: Option<T>) -> Result<(), OpError> {
        if let Some(other) = other {
            keep_if(result, &other, |a, b| a > b);
        }
        Ok(())
    }

    fn reduce(&self, result: &mut Option<T>, arg: &T) -> Result<(), OpError> {
        keep_if(result, arg, |a, b| a > b);
        Ok(())
    }
}

impl<T> ReduceOp for Min<T>
where
    T: PartialOrd + Clone + Send + Sync + 'static,
{
    type Result = Option<T>;
    type Argument = T;

    fn identity(&self) -> Option<T> {
        None
    }

    fn merge(&self, result: &mut Option<T>, other: Option<T>) -> Result<(), OpError> {
        if let Some(other) = other {
            keep_if(result, &other, |a, b| a < b);
        }
        Ok(())
    }

    fn reduce(&self, result: &mut Option<T>, arg: &T) -> Result<(), OpError> {
        keep_if(result, arg, |a, b| a < b);
        Ok(())
    }
}

/// Bitwise OR of all arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitOr;

impl ReduceOp for BitOr {
    type Result = u64;
    type Argument = u64;

    fn identity(&self) -> u64 {
        0
    }

    fn merge(&self, result: &mut u64, other: u64) -> Result<(), OpError> {
        *result |= other;
        Ok(())
    }

    fn reduce(&self, result: &mut u64, arg: &u64) -> Result<(), OpError> {
        *result |= arg;
        Ok(())
    }
}

/// Bitwise AND of all arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitAnd;

impl ReduceOp for BitAnd {
    type Result = u64;
    type Argument = u64;

    fn identity(&self) -> u64 {
        u64::MAX
    }

    fn merge(&self, result: &mut u64, other: u64) -> Result<(), OpError> {
        *result &= other;
        Ok(())
    }

    fn reduce(&self, result: &mut u64, arg: &u64) -> Result<(), OpError> {
        *result &= arg;
        Ok(())
    }
}

/// Sum of elementwise products over `(left, right)` vector pairs.
///
/// Fails with an [`OpError`] when a pair's vectors differ in length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DotProduct;

impl PairReduceOp for DotProduct {
    type Result = f64;
    type Left = Vec<f64>;
    type Right = Vec<f64>;

    fn identity(&self) -> f64 {
        0.0
    }

    fn merge(&self, result: &mut f64, other: f64) -> Result<(), OpError> {
        *result += other;
        Ok(())
    }

    fn reduce(&self, result: &mut f64, left: &Vec<f64>, right: &Vec<f64>) -> Result<(), OpError> {
        if left.len() != right.len() {
            return Err(OpError::new(format!(
                "dot product length mismatch: {} vs {}",
                left.len(),
                right.len()
            )));
        }
        *result += left.iter().zip(right).map(|(l, r)| l * r).sum::<f64>();
        Ok(())
    }
}
