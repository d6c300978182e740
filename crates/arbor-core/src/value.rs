// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single-assignment asynchronous values.
//!
//! An [`AsyncValue`] starts pending and is resolved exactly once by
//! [`AsyncValue::set`]. Observers can poll it ([`is_ready`](AsyncValue::is_ready),
//! [`get`](AsyncValue::get)), block on it ([`wait`](AsyncValue::wait)),
//! `await` it ([`resolved`](AsyncValue::resolved)), or subscribe a one-shot
//! callback ([`register_completion`](AsyncValue::register_completion)).
//!
//! # Thread Safety
//!
//! The value is written while the waiter lock is held and callbacks are
//! registered under the same lock, so a callback registered concurrently with
//! `set` is either fired by `set` or fired inline by `register_completion`;
//! never both, never neither. Callbacks always run with the lock released.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::AsyncValueError;

/// One-shot completion callback.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Shared<T> {
    value: OnceLock<T>,
    waiters: Mutex<Waiters>,
    signal: Condvar,
}

#[derive(Default)]
struct Waiters {
    callbacks: Vec<Callback>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to a value that becomes available later.
///
/// Cloning is cheap and every clone observes the same slot.
pub struct AsyncValue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for AsyncValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("AsyncValue::Ready").field(value).finish(),
            None => f.write_str("AsyncValue::Pending"),
        }
    }
}

impl<T> From<T> for AsyncValue<T> {
    fn from(value: T) -> Self {
        Self::ready(value)
    }
}

impl<T> AsyncValue<T> {
    /// Creates an unresolved value.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                value: OnceLock::new(),
                waiters: Mutex::new(Waiters::default()),
                signal: Condvar::new(),
            }),
        }
    }

    /// Creates a value that is already resolved.
    pub fn ready(value: T) -> Self {
        let this = Self::new();
        // A fresh OnceLock cannot already be initialised.
        let _ = this.shared.value.set(value);
        this
    }

    /// Resolves the value and fires every registered callback.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncValueError::AlreadySet`] if the value was already
    /// resolved; the new value is dropped.
    pub fn set(&self, value: T) -> Result<(), AsyncValueError> {
        let callbacks = {
            let mut waiters = self.shared.lock();
            if self.shared.value.set(value).is_err() {
                return Err(AsyncValueError::AlreadySet);
            }
            std::mem::take(&mut waiters.callbacks)
        };
        self.shared.signal.notify_all();
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    /// Returns true once the value has been set.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.value.get().is_some()
    }

    /// Returns the value if it has been set.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.shared.value.get()
    }

    /// Registers a callback that fires exactly once when the value resolves.
    ///
    /// If the value is already resolved the callback runs immediately on the
    /// calling thread. Otherwise it runs on the thread that calls
    /// [`set`](Self::set).
    pub fn register_completion(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut waiters = self.shared.lock();
            if !self.is_ready() {
                waiters.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Blocks the calling thread until the value resolves.
    pub fn wait(&self) -> &T {
        if let Some(value) = self.get() {
            return value;
        }
        let mut waiters = self.shared.lock();
        loop {
            if let Some(value) = self.shared.value.get() {
                return value;
            }
            waiters = self
                .shared
                .signal
                .wait(waiters)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns a future that completes with a reference to the value.
    pub fn resolved(&self) -> Resolved<'_, T> {
        Resolved {
            value: self,
            waker: None,
        }
    }

    /// Returns true if both handles observe the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Future returned by [`AsyncValue::resolved`].
pub struct Resolved<'a, T> {
    value: &'a AsyncValue<T>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl<T> fmt::Debug for Resolved<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("ready", &self.value.is_ready())
            .finish_non_exhaustive()
    }
}

impl<'a, T> Future for Resolved<'a, T> {
    type Output = &'a T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let value: &'a AsyncValue<T> = this.value;
        if let Some(resolved) = value.get() {
            return Poll::Ready(resolved);
        }
        if let Some(slot) = &this.waker {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(cx.waker().clone());
        } else {
            let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
            let fired = Arc::clone(&slot);
            this.waker = Some(slot);
            value.register_completion(move || {
                let waker = fired.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
        }
        value.get().map_or(Poll::Pending, Poll::Ready)
    }
}
