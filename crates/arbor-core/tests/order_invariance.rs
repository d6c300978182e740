// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The result equals the sequential fold no matter how resolutions and merge
//! tasks interleave.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;

use arbor_core::{AsyncValue, BitAnd, BitOr, Max, Min, ReduceOp, ReduceTask, Sum};
use arbor_dry_tests::{shuffle, CallbackProbe, CountingSum, ManualScheduler, XorShift64};

/// Reduces `args` through a manual scheduler. Some arguments are ready when
/// added, the rest resolve in a shuffled order while merge tasks run in
/// random batches.
fn drive<O>(op: O, args: &[O::Argument], seed: u64) -> O::Result
where
    O: ReduceOp,
    O::Argument: Clone,
    O::Result: Clone,
{
    let mut rng = XorShift64::new(seed);
    let sched = ManualScheduler::new();
    let probe = CallbackProbe::new();
    let mut task = ReduceTask::new(op, sched.clone());

    let mut late = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if rng.below(4) == 0 {
            task.add_with_callback(arg.clone(), probe.callback(i)).unwrap();
        } else {
            let value = AsyncValue::<O::Argument>::new();
            task.add_with_callback(value.clone(), probe.callback(i))
                .unwrap();
            late.push((value, arg.clone()));
        }
    }
    let future = task.submit();

    shuffle(&mut rng, &mut late);
    for (value, arg) in late {
        value.set(arg).unwrap();
        if rng.below(3) == 0 {
            sched.run_shuffled(&mut rng);
        }
    }
    sched.run_shuffled(&mut rng);

    assert!(probe.each_fired_once(args.len()));
    assert!(future.progress().is_settled());
    future.wait().unwrap().clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sum_matches_sequential_fold(
        args in prop::collection::vec(any::<u32>(), 0..200),
        seed in any::<u64>(),
    ) {
        let args: Vec<u64> = args.into_iter().map(u64::from).collect();
        let expected: u64 = args.iter().sum();
        prop_assert_eq!(drive(Sum::<u64>::default(), &args, seed), expected);
    }

    #[test]
    fn extremes_match_sequential_fold(
        args in prop::collection::vec(any::<i64>(), 0..120),
        seed in any::<u64>(),
    ) {
        prop_assert_eq!(drive(Max::<i64>::default(), &args, seed), args.iter().copied().max());
        prop_assert_eq!(drive(Min::<i64>::default(), &args, seed), args.iter().copied().min());
    }

    #[test]
    fn bit_ops_match_sequential_fold(
        args in prop::collection::vec(any::<u64>(), 0..120),
        seed in any::<u64>(),
    ) {
        prop_assert_eq!(drive(BitOr, &args, seed), args.iter().fold(0, |a, b| a | b));
        prop_assert_eq!(drive(BitAnd, &args, seed), args.iter().fold(u64::MAX, |a, b| a & b));
    }

    #[test]
    fn every_argument_is_folded_once(
        n in 0_usize..150,
        seed in any::<u64>(),
    ) {
        let op = CountingSum::new();
        let args: Vec<u64> = (0..n as u64).collect();
        let total = drive(op.clone(), &args, seed);
        prop_assert_eq!(total, args.iter().sum::<u64>());
        prop_assert_eq!(op.arguments_folded(), n);
        prop_assert_eq!(op.finalizes(), 1);
    }
}
