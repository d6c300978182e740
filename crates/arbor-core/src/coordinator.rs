// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reduction coordinator: the ready slot and the master counter.
//!
//! The slot holds at most one unpaired input. Each ready input either parks
//! in an empty slot or pairs with whatever is parked there, and the pair is
//! handed to a merge task. A merge task folds its pair, then keeps draining
//! the slot until it finds it empty and parks its own result there.
//!
//! # Accounting
//!
//! The master counter starts at one (held by the handle until `submit`) and
//! gains one per added argument. A merge task retires the arguments it
//! consumed only after it parked its result, so the counter reaches zero only
//! when every argument has been folded and the slot holds the single final
//! result.
//!
//! # Failure
//!
//! The first operator error, operator panic, or refused merge task poisons
//! the coordinator: the result future resolves to that error immediately,
//! the slot is cleared, and every input that becomes ready afterwards is
//! dropped without firing its callback. Accounting continues so the counter
//! still reaches zero.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace, warn};

use crate::error::{OpError, ReduceError, ScheduleError};
use crate::op::ReduceOp;
use crate::pending::{Deferred, PendingArgument};
use crate::sched::{Priority, Scheduler};
use crate::value::{AsyncValue, Callback};

/// Live accounting for one reduction.
///
/// Obtained from [`ReduceFuture::progress`](crate::ReduceFuture::progress).
#[derive(Debug)]
pub struct Progress {
    outstanding: AtomicUsize,
    consumed: AtomicUsize,
    merges: AtomicUsize,
}

impl Progress {
    fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(1),
            consumed: AtomicUsize::new(0),
            merges: AtomicUsize::new(0),
        }
    }

    /// Value of the master counter: arguments not yet retired, plus one
    /// until the handle is submitted.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of arguments folded into a result so far.
    pub fn consumed(&self) -> usize {
        self.consumed.load(Ordering::Acquire)
    }

    /// Number of merge tasks that have started.
    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::Acquire)
    }

    /// True once the master counter reached zero.
    pub fn is_settled(&self) -> bool {
        self.outstanding() == 0
    }
}

type Node<D> = Arc<PendingArgument<D>>;

/// Contents of the coordinator's ready slot.
enum ReadySlot<R, D> {
    Empty,
    Result(R),
    Argument(Node<D>),
}

/// An input taken out of the slot by a draining merge task.
enum Ready<R, D> {
    Argument(Node<D>),
    Merged(R),
}

/// Work handed to one merge task.
enum Merge<R, D> {
    /// Fold one argument into a partial result.
    Seeded(R, Node<D>),
    /// Fold two arguments into a fresh accumulator.
    Paired(Node<D>, Node<D>),
}

impl<R, D> Merge<R, D> {
    /// Number of argument nodes the task carries.
    fn arguments(&self) -> usize {
        match self {
            Self::Seeded(..) => 1,
            Self::Paired(..) => 2,
        }
    }
}

pub(crate) struct Coordinator<O: ReduceOp, S, D> {
    op: O,
    scheduler: S,
    slot: Mutex<ReadySlot<O::Result, D>>,
    poisoned: AtomicBool,
    future: AsyncValue<Result<O::Result, ReduceError>>,
    progress: Arc<Progress>,
}

impl<O, S, D> Coordinator<O, S, D>
where
    O: ReduceOp,
    S: Scheduler,
    D: Deferred<Output = O::Argument>,
{
    pub(crate) fn new(op: O, scheduler: S, on_complete: Option<Callback>) -> Arc<Self> {
        let identity = op.identity();
        let future = AsyncValue::new();
        if let Some(callback) = on_complete {
            future.register_completion(callback);
        }
        Arc::new(Self {
            op,
            scheduler,
            slot: Mutex::new(ReadySlot::Result(identity)),
            poisoned: AtomicBool::new(false),
            future,
            progress: Arc::new(Progress::new()),
        })
    }

    pub(crate) fn future(&self) -> &AsyncValue<Result<O::Result, ReduceError>> {
        &self.future
    }

    pub(crate) fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    fn lock(&self) -> MutexGuard<'_, ReadySlot<O::Result, D>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Registers one argument and arms its node.
    pub(crate) fn add(
        self: &Arc<Self>,
        input: D,
        on_consumed: Option<Callback>,
    ) -> Result<(), ScheduleError> {
        self.progress.outstanding.fetch_add(1, Ordering::AcqRel);
        let node = PendingArgument::new(input, on_consumed);
        let coordinator = Arc::clone(self);
        node.arm(move |node| coordinator.ready(node))
    }

    /// Handles an argument whose inputs have all resolved.
    fn ready(self: &Arc<Self>, node: Node<D>) -> Result<(), ScheduleError> {
        let merge = {
            let mut slot = self.lock();
            if self.is_poisoned() {
                drop(slot);
                trace!("argument ready after failure; dropped");
                drop(node);
                self.retire(1);
                return Ok(());
            }
            match mem::replace(&mut *slot, ReadySlot::Empty) {
                ReadySlot::Empty => {
                    *slot = ReadySlot::Argument(node);
                    trace!("argument parked");
                    return Ok(());
                }
                ReadySlot::Result(result) => Merge::Seeded(result, node),
                ReadySlot::Argument(parked) => Merge::Paired(parked, node),
            }
        };
        self.schedule(merge)
    }

    fn schedule(self: &Arc<Self>, merge: Merge<O::Result, D>) -> Result<(), ScheduleError> {
        let arguments = merge.arguments();
        let coordinator = Arc::clone(self);
        let task = Box::new(move || coordinator.run_merge(merge));
        match self.scheduler.schedule(task, Priority::High) {
            Ok(()) => {
                trace!(arguments, "merge scheduled");
                Ok(())
            }
            Err(err) => {
                // The rejected task dropped its inputs without running.
                self.poison(err.into());
                self.retire(arguments);
                Err(err)
            }
        }
    }

    fn run_merge(&self, merge: Merge<O::Result, D>) {
        self.progress.merges.fetch_add(1, Ordering::AcqRel);
        let mut held = merge.arguments();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.fold(merge, &mut held)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.poison(err),
            Err(payload) => self.poison(ReduceError::from_panic(payload.as_ref())),
        }
        self.retire(held);
    }

    /// Folds the task's inputs, then drains the slot until it is empty and
    /// parks the result there. `held` counts every argument this task owns.
    fn fold(&self, merge: Merge<O::Result, D>, held: &mut usize) -> Result<(), ReduceError> {
        if self.is_poisoned() {
            return Ok(());
        }
        let mut result = match merge {
            Merge::Seeded(mut result, node) => {
                self.op.reduce(&mut result, node.argument()?)?;
                self.consumed(node);
                result
            }
            Merge::Paired(first, second) => {
                let mut result = self.op.identity();
                self.op
                    .reduce_pair(&mut result, first.argument()?, second.argument()?)?;
                self.consumed(first);
                self.consumed(second);
                result
            }
        };

        loop {
            let next = {
                let mut slot = self.lock();
                if self.is_poisoned() {
                    return Ok(());
                }
                match mem::replace(&mut *slot, ReadySlot::Empty) {
                    ReadySlot::Empty => {
                        *slot = ReadySlot::Result(result);
                        trace!("partial result parked");
                        return Ok(());
                    }
                    ReadySlot::Result(other) => Ready::Merged(other),
                    ReadySlot::Argument(node) => Ready::Argument(node),
                }
            };
            match next {
                Ready::Argument(node) => {
                    *held += 1;
                    self.op.reduce(&mut result, node.argument()?)?;
                    self.consumed(node);
                }
                Ready::Merged(other) => self.op.merge(&mut result, other)?,
            }
        }
    }

    fn consumed(&self, node: Node<D>) {
        self.progress.consumed.fetch_add(1, Ordering::AcqRel);
        node.consume();
    }

    /// Releases `n` units of the master counter, finishing on the last one.
    pub(crate) fn retire(&self, n: usize) {
        let prev = self.progress.outstanding.fetch_sub(n, Ordering::AcqRel);
        assert!(prev >= n, "master counter underflow ({prev} - {n})");
        if prev == n {
            self.finish();
        }
    }

    fn finish(&self) {
        let slot = mem::replace(&mut *self.lock(), ReadySlot::Empty);
        if self.is_poisoned() {
            debug!("poisoned reduction settled");
            return;
        }
        let outcome = match slot {
            ReadySlot::Result(result) => {
                match catch_unwind(AssertUnwindSafe(|| self.op.finalize(result))) {
                    Ok(finalized) => finalized.map_err(ReduceError::from),
                    Err(payload) => Err(ReduceError::from_panic(payload.as_ref())),
                }
            }
            ReadySlot::Empty | ReadySlot::Argument(_) => {
                error!("reduction settled without a parked result");
                Err(OpError::new("reduction settled without a result").into())
            }
        };
        match &outcome {
            Ok(_) => debug!(
                consumed = self.progress.consumed(),
                merges = self.progress.merges(),
                "reduction finished"
            ),
            Err(err) => warn!(%err, "finalize failed"),
        }
        if self.future.set(outcome).is_err() {
            error!("reduction result was already published");
        }
    }

    /// Records the first failure and clears the slot.
    fn poison(&self, err: ReduceError) {
        if self.poisoned.swap(true, Ordering::AcqRel) {
            trace!(%err, "further failure after poisoning");
            return;
        }
        warn!(%err, "reduction poisoned");
        let abandoned = mem::replace(&mut *self.lock(), ReadySlot::Empty);
        if self.future.set(Err(err)).is_err() {
            error!("reduction result was already published");
        }
        if let ReadySlot::Argument(node) = abandoned {
            drop(node);
            self.retire(1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sched::{Inline, Task};
    use std::collections::VecDeque;

    struct Sum;

    impl ReduceOp for Sum {
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
            *result += arg;
            Ok(())
        }
    }

    /// Holds tasks until the test runs them.
    #[derive(Default)]
    struct Held(Mutex<VecDeque<Task>>);

    impl Held {
        fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let next = self.0.lock().unwrap().pop_front();
                let Some(task) = next else { return ran };
                task();
                ran += 1;
            }
        }
    }

    impl Scheduler for Held {
        fn schedule(&self, task: Task, _priority: Priority) -> Result<(), ScheduleError> {
            self.0.lock().unwrap().push_back(task);
            Ok(())
        }
    }

    type SumCoordinator<S> = Coordinator<Sum, S, AsyncValue<i64>>;

    #[test]
    fn zero_arguments_finalize_on_retire() {
        let c: Arc<SumCoordinator<Inline>> = Coordinator::new(Sum, Inline, None);
        assert!(!c.future().is_ready());
        c.retire(1);
        assert_eq!(c.future().get(), Some(&Ok(0)));
        assert!(c.progress().is_settled());
    }

    #[test]
    fn first_argument_merges_with_identity() {
        let held: &'static Held = Box::leak(Box::new(Held::default()));
        let c: Arc<SumCoordinator<&'static Held>> = Coordinator::new(Sum, held, None);
        c.add(AsyncValue::ready(4), None).unwrap();
        // Slot held the identity, so one merge is waiting.
        assert_eq!(held.run_all(), 1);
        assert!(matches!(*c.lock(), ReadySlot::Result(4)));
        c.retire(1);
        assert_eq!(c.future().get(), Some(&Ok(4)));
    }

    #[test]
    fn second_ready_argument_parks_then_pairs() {
        let held: &'static Held = Box::leak(Box::new(Held::default()));
        let c: Arc<SumCoordinator<&'static Held>> = Coordinator::new(Sum, held, None);
        c.add(AsyncValue::ready(1), None).unwrap(); // takes the identity
        c.add(AsyncValue::ready(2), None).unwrap(); // parks
        assert!(matches!(*c.lock(), ReadySlot::Argument(_)));
        c.add(AsyncValue::ready(3), None).unwrap(); // pairs with 2
        assert!(matches!(*c.lock(), ReadySlot::Empty));
        assert_eq!(c.progress().outstanding(), 4);

        assert_eq!(held.run_all(), 2);
        c.retire(1);
        assert_eq!(c.future().get(), Some(&Ok(6)));
        assert_eq!(c.progress().consumed(), 3);
        assert!(c.progress().is_settled());
    }

    #[test]
    fn drain_loop_absorbs_parked_partial_results() {
        let held: &'static Held = Box::leak(Box::new(Held::default()));
        let c: Arc<SumCoordinator<&'static Held>> = Coordinator::new(Sum, held, None);
        for v in 1..=5 {
            c.add(AsyncValue::ready(v), None).unwrap();
        }
        held.run_all();
        c.retire(1);
        assert_eq!(c.future().get(), Some(&Ok(15)));
    }

    #[test]
    fn refused_merge_poisons_and_still_settles() {
        struct Refuse;
        impl Scheduler for Refuse {
            fn schedule(&self, _task: Task, _p: Priority) -> Result<(), ScheduleError> {
                Err(ScheduleError::ShutDown)
            }
        }
        let c: Arc<SumCoordinator<Refuse>> = Coordinator::new(Sum, Refuse, None);
        assert_eq!(
            c.add(AsyncValue::ready(1), None),
            Err(ScheduleError::ShutDown)
        );
        assert_eq!(
            c.future().get(),
            Some(&Err(ReduceError::Schedule(ScheduleError::ShutDown)))
        );
        // Later arguments are dropped quietly.
        assert_eq!(c.add(AsyncValue::ready(2), None), Ok(()));
        c.retire(1);
        assert!(c.progress().is_settled());
    }

    #[test]
    #[should_panic(expected = "master counter underflow")]
    fn underflow_asserts() {
        let c: Arc<SumCoordinator<Inline>> = Coordinator::new(Sum, Inline, None);
        c.retire(2);
    }
}
