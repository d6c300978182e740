// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operator errors, operator panics and refused merge tasks.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use arbor_core::{
    AsyncValue, Inline, OpError, ReduceError, ReduceTask, ScheduleError, Sum, WorkerPool,
};
use arbor_dry_tests::{CallbackProbe, FailingOp, ManualScheduler, PanickingOp};

#[test]
fn operator_error_resolves_the_future() {
    let probe = CallbackProbe::new();
    let mut task = ReduceTask::new(FailingOp::on(3), Inline);
    task.add_with_callback(1_i64, probe.callback(0)).unwrap();
    task.add_with_callback(3_i64, probe.callback(1)).unwrap();
    // Added after the failure: dropped without running its callback.
    task.add_with_callback(5_i64, probe.callback(2)).unwrap();
    let future = task.submit();

    assert_eq!(
        future.wait(),
        Err(ReduceError::Operator(OpError::new("refusing argument 3")))
    );
    assert_eq!(probe.order(), vec![0]);
    assert!(future.progress().is_settled());
}

#[test]
fn error_resolves_before_stragglers_arrive() {
    let straggler = AsyncValue::new();
    let probe = CallbackProbe::new();
    let mut task = ReduceTask::new(FailingOp::on(-1), Inline);
    task.add_with_callback(straggler.clone(), probe.callback(0))
        .unwrap();
    task.add(-1_i64).unwrap();
    let future = task.submit();

    assert!(matches!(future.get(), Some(Err(ReduceError::Operator(_)))));
    assert!(!future.progress().is_settled());

    straggler.set(2).unwrap();
    assert!(future.progress().is_settled());
    assert_eq!(probe.total(), 0);
}

#[test]
fn operator_panic_is_reported_and_worker_survives() {
    let pool = Arc::new(WorkerPool::with_workers(2).unwrap());
    let mut task = ReduceTask::new(PanickingOp::on(4), Arc::clone(&pool));
    for v in 1..=6_i64 {
        task.add(v).unwrap();
    }
    let future = task.submit();
    assert_eq!(
        future.wait(),
        Err(ReduceError::Panicked("boom on 4".into()))
    );

    pool.wait_idle();
    assert_eq!(pool.panicked(), 0);
    assert!(future.progress().is_settled());

    // The same pool keeps serving reductions.
    let mut again = ReduceTask::new(Sum::<i64>::default(), Arc::clone(&pool));
    again.add(4_i64).unwrap();
    assert_eq!(again.submit().wait(), Ok(&4));
}

#[test]
fn full_queue_poisons_and_add_reports_it() {
    let sched = ManualScheduler::with_capacity(1);
    let mut task = ReduceTask::new(Sum::<u32>::default(), sched.clone());
    task.add(1_u32).unwrap(); // merges with the identity; fills the queue
    task.add(2_u32).unwrap(); // parks
    let err = task.add(3_u32).unwrap_err(); // pairs with 2; refused
    assert_eq!(err, ScheduleError::QueueFull { capacity: 1 });
    assert_eq!(task.count(), 2);

    let future = task.submit();
    assert_eq!(
        future.get(),
        Some(Err(ReduceError::Schedule(ScheduleError::QueueFull {
            capacity: 1
        })))
    );

    sched.run_all();
    assert!(future.progress().is_settled());
}

#[test]
fn refusal_from_a_completion_callback_still_poisons() {
    let sched = ManualScheduler::new();
    let late = AsyncValue::new();
    let mut task = ReduceTask::new(Sum::<u32>::default(), sched.clone());
    task.add(late.clone()).unwrap();
    let future = task.submit();

    sched.shut_down();
    late.set(7).unwrap();
    assert_eq!(
        future.wait(),
        Err(ReduceError::Schedule(ScheduleError::ShutDown))
    );
    assert!(future.progress().is_settled());
}

#[test]
fn finalize_failure_on_empty_reduction_uses_the_same_channel() {
    let future = ReduceTask::new(FailingOp::in_finalize(), Inline).submit();
    assert_eq!(
        future.get(),
        Some(Err(ReduceError::Operator(OpError::new("finalize refused"))))
    );

    let future = ReduceTask::new(PanickingOp::in_finalize(), Inline).submit();
    assert_eq!(
        future.get(),
        Some(Err(ReduceError::Panicked("boom in finalize".into())))
    );
}

#[test]
fn finalize_failure_after_merges() {
    let mut task = ReduceTask::new(FailingOp::in_finalize(), Inline);
    task.add(1_i64).unwrap();
    task.add(2_i64).unwrap();
    let future = task.submit();
    assert!(matches!(future.wait(), Err(ReduceError::Operator(_))));
}
