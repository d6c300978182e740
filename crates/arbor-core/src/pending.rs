// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pending-argument nodes: dependency tracking for not-yet-resolved inputs.
//!
//! A node wraps one [`Deferred`] input (a single [`AsyncValue`] or an
//! [`ArgPair`]) and counts the values it still waits on. Whichever
//! completion callback takes the counter from one to zero hands the node to
//! the coordinator; the node is then owned by exactly one merge task, which
//! consumes it after reading its argument.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{trace, warn};

use crate::error::{OpError, ScheduleError};
use crate::value::{AsyncValue, Callback};

/// An input that resolves once all of its asynchronous values resolve.
pub trait Deferred: Send + Sync + 'static {
    /// What a merge reads once the input is ready.
    type Output: Send + Sync + 'static;

    /// Number of asynchronous values this input waits on.
    fn dependencies(&self) -> usize;

    /// Returns true when every wrapped value has resolved.
    fn is_ready(&self) -> bool;

    /// Registers one completion callback per wrapped value, each produced by
    /// `notify`. Callbacks for values that already resolved fire inline.
    fn on_resolved(&self, notify: &dyn Fn() -> Callback);

    /// The resolved input, or `None` while any value is pending.
    fn output(&self) -> Option<&Self::Output>;
}

impl<T: Send + Sync + 'static> Deferred for AsyncValue<T> {
    type Output = T;

    #[inline]
    fn dependencies(&self) -> usize {
        1
    }

    #[inline]
    fn is_ready(&self) -> bool {
        AsyncValue::is_ready(self)
    }

    fn on_resolved(&self, notify: &dyn Fn() -> Callback) {
        self.register_completion(notify());
    }

    #[inline]
    fn output(&self) -> Option<&T> {
        self.get()
    }
}

/// Co-indexed left/right arguments for a pairwise reduction.
pub struct ArgPair<L, R> {
    left: AsyncValue<L>,
    right: AsyncValue<R>,
}

impl<L, R> Clone for ArgPair<L, R> {
    fn clone(&self) -> Self {
        Self {
            left: self.left.clone(),
            right: self.right.clone(),
        }
    }
}

impl<L: fmt::Debug, R: fmt::Debug> fmt::Debug for ArgPair<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgPair")
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

impl<L, R> ArgPair<L, R> {
    /// Pairs two values, each either plain or an existing handle.
    ///
    /// Passing handles needs `L` and `R` fixed by context; otherwise use
    /// [`from_values`](Self::from_values).
    pub fn new(left: impl Into<AsyncValue<L>>, right: impl Into<AsyncValue<R>>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Pairs two existing value handles.
    pub fn from_values(left: AsyncValue<L>, right: AsyncValue<R>) -> Self {
        Self { left, right }
    }

    /// Left-hand value handle.
    pub fn left(&self) -> &AsyncValue<L> {
        &self.left
    }

    /// Right-hand value handle.
    pub fn right(&self) -> &AsyncValue<R> {
        &self.right
    }

    /// Both resolved values.
    ///
    /// # Errors
    ///
    /// Returns an [`OpError`] if either side is still pending. The engine
    /// only hands ready pairs to an operator, so this indicates misuse.
    pub fn resolved(&self) -> Result<(&L, &R), OpError> {
        match (self.left.get(), self.right.get()) {
            (Some(l), Some(r)) => Ok((l, r)),
            _ => Err(OpError::new("argument pair read before both sides resolved")),
        }
    }
}

impl<L, R> Deferred for ArgPair<L, R>
where
    L: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    type Output = Self;

    #[inline]
    fn dependencies(&self) -> usize {
        2
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.left.is_ready() && self.right.is_ready()
    }

    fn on_resolved(&self, notify: &dyn Fn() -> Callback) {
        self.left.register_completion(notify());
        self.right.register_completion(notify());
    }

    fn output(&self) -> Option<&Self> {
        Deferred::is_ready(self).then_some(self)
    }
}

/// One added argument awaiting its inputs.
pub(crate) struct PendingArgument<D> {
    input: D,
    remaining: AtomicUsize,
    on_consumed: Mutex<Option<Callback>>,
}

impl<D: Deferred> PendingArgument<D> {
    pub(crate) fn new(input: D, on_consumed: Option<Callback>) -> Arc<Self> {
        let remaining = AtomicUsize::new(input.dependencies());
        Arc::new(Self {
            input,
            remaining,
            on_consumed: Mutex::new(on_consumed),
        })
    }

    /// Starts tracking the inputs; `on_ready` is called exactly once, when the
    /// last input resolves.
    ///
    /// If every input is already resolved, `on_ready` runs on the calling
    /// thread and its result is returned. Otherwise readiness is reported
    /// from a completion callback and a scheduling failure there is left to
    /// `on_ready` to record.
    pub(crate) fn arm<F>(self: Arc<Self>, on_ready: F) -> Result<(), ScheduleError>
    where
        F: Fn(Arc<Self>) -> Result<(), ScheduleError> + Clone + Send + Sync + 'static,
    {
        if self.input.is_ready() {
            self.remaining.store(0, Ordering::Release);
            return on_ready(self);
        }
        self.input.on_resolved(&|| {
            let node = Arc::clone(&self);
            let on_ready = on_ready.clone();
            Box::new(move || node.dependency_resolved(&on_ready))
        });
        Ok(())
    }

    fn dependency_resolved<F>(self: Arc<Self>, on_ready: &F)
    where
        F: Fn(Arc<Self>) -> Result<(), ScheduleError>,
    {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "argument dependency resolved more than once");
        trace!(remaining = prev - 1, "argument dependency resolved");
        if prev == 1 {
            if let Err(err) = on_ready(self) {
                warn!(%err, "ready argument could not be scheduled");
            }
        }
    }

    /// The resolved argument.
    pub(crate) fn argument(&self) -> Result<&D::Output, OpError> {
        self.input
            .output()
            .ok_or_else(|| OpError::new("argument read before it resolved"))
    }

    /// Retires the node after a merge read its argument, firing the external
    /// callback.
    pub(crate) fn consume(self: Arc<Self>) {
        let callback = self
            .on_consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(self);
        if let Some(callback) = callback {
            callback();
        }
    }
}
