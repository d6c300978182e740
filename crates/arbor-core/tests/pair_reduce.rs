// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pairwise reductions: dot products over co-indexed vector pairs.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use arbor_core::{AsyncValue, DotProduct, Inline, ReduceError, ReducePairTask, WorkerPool};
use arbor_dry_tests::{shuffle, CallbackProbe, ManualScheduler, XorShift64, SEEDS};

fn vectors() -> Vec<(Vec<f64>, Vec<f64>)> {
    vec![
        (vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]), // 32
        (vec![-1.0, 0.5], vec![2.0, 8.0]),          // 2
        (vec![10.0], vec![0.25]),                   // 2.5
    ]
}

const EXPECTED: f64 = 36.5;

#[test]
fn ready_pairs_on_inline_scheduler() {
    let mut task = ReducePairTask::new(DotProduct, Inline);
    for (l, r) in vectors() {
        task.add(l, r).unwrap();
    }
    assert_eq!(task.count(), 3);
    assert_eq!(*task.submit().wait().unwrap(), EXPECTED);
}

#[test]
fn any_resolution_order_gives_the_same_dot_product() {
    let pool = Arc::new(WorkerPool::with_workers(3).unwrap());
    for &seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let lefts: Vec<AsyncValue<Vec<f64>>> = (0..3).map(|_| AsyncValue::new()).collect();
        let rights: Vec<AsyncValue<Vec<f64>>> = (0..3).map(|_| AsyncValue::new()).collect();

        let mut task = ReducePairTask::new(DotProduct, Arc::clone(&pool));
        for (l, r) in lefts.iter().zip(&rights) {
            task.add(l.clone(), r.clone()).unwrap();
        }
        let future = task.submit();

        // Resolve all six halves in a seed-dependent order.
        let mut sets: Vec<(usize, bool)> = (0..3).flat_map(|i| [(i, true), (i, false)]).collect();
        shuffle(&mut rng, &mut sets);
        let data = vectors();
        for (i, is_left) in sets {
            if is_left {
                lefts[i].set(data[i].0.clone()).unwrap();
            } else {
                rights[i].set(data[i].1.clone()).unwrap();
            }
        }

        assert_eq!(*future.wait().unwrap(), EXPECTED, "seed {seed:#x}");
        assert!(future.progress().is_settled());
    }
}

#[test]
fn half_resolved_pair_is_not_folded() {
    let sched = ManualScheduler::new();
    let probe = CallbackProbe::new();
    let right = AsyncValue::new();
    let mut task = ReducePairTask::new(DotProduct, sched.clone());
    task.add_with_callback(vec![2.0], right.clone(), probe.callback(0))
        .unwrap();
    let future = task.submit();

    sched.run_all();
    assert_eq!(sched.accepted(), 0);
    assert_eq!(probe.total(), 0);

    right.set(vec![3.0]).unwrap();
    sched.run_all();
    assert_eq!(probe.order(), vec![0]);
    assert_eq!(*future.wait().unwrap(), 6.0);
}

#[test]
fn length_mismatch_fails_the_reduction() {
    let mut task = ReducePairTask::new(DotProduct, Inline);
    task.add(vec![1.0, 1.0], vec![1.0, 1.0]).unwrap();
    task.add(vec![1.0, 2.0, 3.0], vec![1.0]).unwrap();
    let err = task.submit().wait().unwrap_err();
    assert!(
        matches!(&err, ReduceError::Operator(op) if op.message().contains("length mismatch")),
        "unexpected error {err:?}"
    );
}
