// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use arbor_core::{ConfigError, ConfigStore, PoolConfig, POOL_CONFIG_KEY};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state, so a test can hand one clone to a
/// [`ConfigService`](arbor_core::ConfigService) and inspect the other.
///
/// # Example
///
/// ```
/// use arbor_dry_tests::InMemoryConfigStore;
/// use arbor_core::{ConfigService, PoolConfig};
///
/// let store = InMemoryConfigStore::with_pool(&PoolConfig::with_workers(3));
/// let service = ConfigService::new(store.clone());
///
/// assert_eq!(service.load_pool().unwrap().workers, 3);
/// assert_eq!(store.load_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `pool` under [`POOL_CONFIG_KEY`].
    pub fn with_pool(pool: &PoolConfig) -> Self {
        let store = Self::new();
        if let Ok(bytes) = serde_json::to_vec(pool) {
            store.lock().data.insert(POOL_CONFIG_KEY.to_owned(), bytes);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts, including failed ones.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts, including failed ones.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Raw bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}
