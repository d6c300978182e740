// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Caller-facing reduction handles and the result future.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::coordinator::{Coordinator, Progress};
use crate::error::{ReduceError, ScheduleError};
use crate::op::{PairOp, PairReduceOp, ReduceOp};
use crate::pending::{ArgPair, Deferred};
use crate::sched::Scheduler;
use crate::value::{AsyncValue, Callback};

/// Builds one reduction: bind an operator and a scheduler, [`add`](Self::add)
/// arguments, then [`submit`](Self::submit).
///
/// Arguments are folded as they resolve, in whatever order that happens.
/// Each argument is armed immediately on `add`, so merging starts before
/// `submit`.
///
/// ```
/// use arbor_core::{AsyncValue, Inline, ReduceTask, Sum};
///
/// let late = AsyncValue::new();
/// let mut task = ReduceTask::new(Sum::<u64>::default(), Inline);
/// task.add(2).unwrap();
/// task.add(late.clone()).unwrap();
/// task.add(7).unwrap();
/// let future = task.submit();
///
/// assert!(!future.is_ready());
/// late.set(5).unwrap();
/// assert_eq!(future.wait(), Ok(&14));
/// ```
pub struct ReduceTask<O, S, D = AsyncValue<<O as ReduceOp>::Argument>>
where
    O: ReduceOp,
{
    coordinator: Arc<Coordinator<O, S, D>>,
    added: usize,
}

impl<O: ReduceOp, S, D> fmt::Debug for ReduceTask<O, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceTask")
            .field("added", &self.added)
            .finish_non_exhaustive()
    }
}

impl<O, S> ReduceTask<O, S>
where
    O: ReduceOp,
    S: Scheduler,
{
    /// Starts a reduction whose merge tasks run on `scheduler`.
    pub fn new(op: O, scheduler: S) -> Self {
        Self::from_parts(op, scheduler, None)
    }

    /// Like [`new`](Self::new); `on_complete` fires once the result future
    /// resolves, whether to a value or an error.
    pub fn with_callback(op: O, scheduler: S, on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self::from_parts(op, scheduler, Some(Box::new(on_complete)))
    }
}

impl<O, S, D> ReduceTask<O, S, D>
where
    O: ReduceOp,
    S: Scheduler,
    D: Deferred<Output = O::Argument>,
{
    pub(crate) fn from_parts(op: O, scheduler: S, on_complete: Option<Callback>) -> Self {
        Self {
            coordinator: Coordinator::new(op, scheduler, on_complete),
            added: 0,
        }
    }

    /// Adds an argument and returns the number of arguments added so far.
    ///
    /// Plain values are wrapped as already-resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns the [`ScheduleError`] when the argument was already resolved
    /// and the merge it triggered was refused. The reduction is poisoned in
    /// that case and its future resolves to [`ReduceError::Schedule`].
    #[instrument(level = "trace", skip_all, fields(index = self.added))]
    pub fn add(&mut self, arg: impl Into<D>) -> Result<usize, ScheduleError> {
        self.push(arg.into(), None)
    }

    /// Like [`add`](Self::add); `callback` fires exactly once, after the
    /// argument has been folded into a result.
    ///
    /// If the reduction fails before this argument is folded, the callback
    /// never fires.
    #[instrument(level = "trace", skip_all, fields(index = self.added))]
    pub fn add_with_callback(
        &mut self,
        arg: impl Into<D>,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<usize, ScheduleError> {
        self.push(arg.into(), Some(Box::new(callback)))
    }

    fn push(&mut self, input: D, callback: Option<Callback>) -> Result<usize, ScheduleError> {
        self.coordinator.add(input, callback)?;
        self.added += 1;
        Ok(self.added)
    }

    /// Number of arguments added. An `add` that returned an error is not
    /// counted.
    pub fn count(&self) -> usize {
        self.added
    }

    /// Releases the handle and returns the result future.
    ///
    /// With no arguments the operator's `finalize(identity)` runs on the
    /// calling thread and the returned future is already resolved.
    #[instrument(level = "debug", skip_all, fields(arguments = self.added))]
    pub fn submit(self) -> ReduceFuture<O::Result> {
        let future = ReduceFuture {
            value: self.coordinator.future().clone(),
            progress: Arc::clone(self.coordinator.progress()),
        };
        debug!("reduction submitted");
        self.coordinator.retire(1);
        future
    }
}

/// Reduction over co-indexed `(left, right)` argument pairs.
///
/// A thin layer over [`ReduceTask`] with [`PairOp`] as the operator; both
/// sides of a pair must resolve before the pair is folded.
pub struct ReducePairTask<P, S>
where
    P: PairReduceOp,
{
    inner: ReduceTask<PairOp<P>, S, ArgPair<P::Left, P::Right>>,
}

impl<P: PairReduceOp, S> fmt::Debug for ReducePairTask<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducePairTask")
            .field("added", &self.inner.added)
            .finish_non_exhaustive()
    }
}

impl<P, S> ReducePairTask<P, S>
where
    P: PairReduceOp,
    S: Scheduler,
{
    /// Starts a pairwise reduction whose merge tasks run on `scheduler`.
    pub fn new(op: P, scheduler: S) -> Self {
        Self {
            inner: ReduceTask::from_parts(PairOp::new(op), scheduler, None),
        }
    }

    /// Like [`new`](Self::new) with a completion callback; see
    /// [`ReduceTask::with_callback`].
    pub fn with_callback(op: P, scheduler: S, on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: ReduceTask::from_parts(
                PairOp::new(op),
                scheduler,
                Some(Box::new(on_complete)),
            ),
        }
    }

    /// Adds one argument pair; see [`ReduceTask::add`].
    ///
    /// # Errors
    ///
    /// As [`ReduceTask::add`].
    pub fn add(
        &mut self,
        left: impl Into<AsyncValue<P::Left>>,
        right: impl Into<AsyncValue<P::Right>>,
    ) -> Result<usize, ScheduleError> {
        self.inner.add(ArgPair::new(left, right))
    }

    /// Adds one argument pair with a consumption callback; see
    /// [`ReduceTask::add_with_callback`].
    ///
    /// # Errors
    ///
    /// As [`ReduceTask::add`].
    pub fn add_with_callback(
        &mut self,
        left: impl Into<AsyncValue<P::Left>>,
        right: impl Into<AsyncValue<P::Right>>,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<usize, ScheduleError> {
        self.inner
            .add_with_callback(ArgPair::new(left, right), callback)
    }

    /// Number of pairs added.
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    /// Releases the handle and returns the result future.
    pub fn submit(self) -> ReduceFuture<P::Result> {
        self.inner.submit()
    }
}

/// Eventual output of a submitted reduction.
///
/// Cloning is cheap; every clone observes the same result.
pub struct ReduceFuture<R> {
    value: AsyncValue<Result<R, ReduceError>>,
    progress: Arc<Progress>,
}

impl<R> Clone for ReduceFuture<R> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for ReduceFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceFuture")
            .field("value", &self.value)
            .field("outstanding", &self.progress.outstanding())
            .finish()
    }
}

impl<R> ReduceFuture<R> {
    /// Returns true once the reduction produced a value or failed.
    pub fn is_ready(&self) -> bool {
        self.value.is_ready()
    }

    /// Non-blocking read of the result.
    pub fn get(&self) -> Option<Result<&R, ReduceError>> {
        self.value.get().map(flatten)
    }

    /// Blocks until the reduction resolves.
    ///
    /// # Errors
    ///
    /// Returns the [`ReduceError`] that poisoned the reduction.
    pub fn wait(&self) -> Result<&R, ReduceError> {
        flatten(self.value.wait())
    }

    /// Awaits the reduction from async code.
    ///
    /// # Errors
    ///
    /// Returns the [`ReduceError`] that poisoned the reduction.
    pub async fn result(&self) -> Result<&R, ReduceError>
    where
        R: Send + Sync,
    {
        flatten(self.value.resolved().await)
    }

    /// Registers a callback fired once the reduction resolves.
    pub fn register_completion(&self, callback: impl FnOnce() + Send + 'static) {
        self.value.register_completion(callback);
    }

    /// Live accounting for this reduction.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

fn flatten<R>(slot: &Result<R, ReduceError>) -> Result<&R, ReduceError> {
    slot.as_ref().map_err(Clone::clone)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::sched::{Inline, Priority, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Product;

    impl ReduceOp for Product {
        type Result = u64;
        type Argument = u64;

        fn identity(&self) -> u64 {
            1
        }

        fn merge(&self, result: &mut u64, other: u64) -> Result<(), OpError> {
            *result *= other;
            Ok(())
        }

        fn reduce(&self, result: &mut u64, arg: &u64) -> Result<(), OpError> {
            *result *= arg;
            Ok(())
        }

        fn finalize(&self, result: u64) -> Result<u64, OpError> {
            Ok(result + 1000)
        }
    }

    #[test]
    fn count_tracks_adds() {
        let mut task = ReduceTask::new(Product, Inline);
        assert_eq!(task.count(), 0);
        assert_eq!(task.add(3_u64).unwrap(), 1);
        assert_eq!(task.add(AsyncValue::new()).unwrap(), 2);
        assert_eq!(task.count(), 2);
    }

    struct Refuse;

    impl Scheduler for Refuse {
        fn schedule(&self, _task: Task, _priority: Priority) -> Result<(), ScheduleError> {
            Err(ScheduleError::ShutDown)
        }
    }

    #[test]
    fn refused_add_is_not_counted() {
        let mut task = ReduceTask::new(Product, Refuse);
        assert_eq!(task.add(2_u64), Err(ScheduleError::ShutDown));
        assert_eq!(task.count(), 0);
        assert_eq!(task.add(AsyncValue::<u64>::new()).unwrap(), 1);
        assert_eq!(task.count(), 1);
        assert_eq!(
            task.submit().get(),
            Some(Err(ReduceError::Schedule(ScheduleError::ShutDown)))
        );
    }

    #[test]
    fn empty_submit_resolves_inline_with_finalized_identity() {
        let future = ReduceTask::new(Product, Inline).submit();
        assert!(future.is_ready());
        assert_eq!(future.get(), Some(Ok(&1001)));
        assert!(future.progress().is_settled());
        assert_eq!(future.progress().merges(), 0);
    }

    #[test]
    fn future_stays_pending_until_last_argument() {
        let late = AsyncValue::new();
        let mut task = ReduceTask::new(Product, Inline);
        task.add(2_u64).unwrap();
        task.add(late.clone()).unwrap();
        let future = task.submit();
        assert_eq!(future.get(), None);
        assert_eq!(future.progress().outstanding(), 1);

        late.set(5).unwrap();
        assert_eq!(future.wait(), Ok(&1010));
        assert_eq!(future.progress().consumed(), 2);
    }

    #[test]
    fn completion_callback_fires_once_after_publish() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut task = ReduceTask::with_callback(Product, Inline, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        task.add(4_u64).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let future = task.submit();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(future.get(), Some(Ok(&1004)));
    }

    #[test]
    fn clones_share_the_result() {
        let mut task = ReduceTask::new(Product, Inline);
        task.add(6_u64).unwrap();
        let a = task.submit();
        let b = a.clone();
        assert_eq!(a.wait(), b.wait());
    }

    struct PairCount;

    impl PairReduceOp for PairCount {
        type Result = usize;
        type Left = ();
        type Right = ();

        fn identity(&self) -> usize {
            0
        }

        fn merge(&self, result: &mut usize, other: usize) -> Result<(), OpError> {
            *result += other;
            Ok(())
        }

        fn reduce(&self, result: &mut usize, _l: &(), _r: &()) -> Result<(), OpError> {
            *result += 1;
            Ok(())
        }
    }

    #[test]
    fn pair_task_waits_for_both_sides() {
        let right = AsyncValue::new();
        let mut task = ReducePairTask::new(PairCount, Inline);
        task.add((), ()).unwrap();
        task.add((), right.clone()).unwrap();
        assert_eq!(task.count(), 2);
        let future = task.submit();
        assert!(!future.is_ready());
        right.set(()).unwrap();
        assert_eq!(future.wait(), Ok(&2));
    }
}
