// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Records which argument callbacks fired, how often, and in what order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Hands out per-argument callbacks and records their firings.
#[derive(Clone, Default)]
pub struct CallbackProbe {
    fired: Arc<Mutex<Vec<usize>>>,
}

impl CallbackProbe {
    /// Empty probe.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<usize>> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callback that records `id` when it fires.
    pub fn callback(&self, id: usize) -> impl FnOnce() + Send + 'static {
        let fired = Arc::clone(&self.fired);
        move || fired.lock().unwrap_or_else(PoisonError::into_inner).push(id)
    }

    /// Number of times the callback for `id` fired.
    pub fn count(&self, id: usize) -> usize {
        self.lock().iter().filter(|&&fired| fired == id).count()
    }

    /// Total firings across all ids.
    pub fn total(&self) -> usize {
        self.lock().len()
    }

    /// Ids in firing order.
    pub fn order(&self) -> Vec<usize> {
        self.lock().clone()
    }

    /// True when ids `0..n` each fired exactly once and nothing else fired.
    pub fn each_fired_once(&self, n: usize) -> bool {
        let mut seen = self.order();
        seen.sort_unstable();
        seen == (0..n).collect::<Vec<_>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_firing_order() {
        let probe = CallbackProbe::new();
        let a = probe.callback(0);
        let b = probe.callback(1);
        b();
        a();
        assert_eq!(probe.order(), vec![1, 0]);
        assert_eq!(probe.count(0), 1);
        assert!(probe.each_fired_once(2));
        assert!(!probe.each_fired_once(3));
    }
}
