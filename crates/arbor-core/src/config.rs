// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pool configuration and the storage port it is loaded through.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Config key under which [`PoolConfig`] is stored.
pub const POOL_CONFIG_KEY: &str = "pool";

/// Default thread name prefix for pool workers.
pub const DEFAULT_THREAD_NAME: &str = "arbor-worker";

/// Worker pool settings.
///
/// Missing fields deserialize to their defaults, so a partial JSON document
/// such as `{"workers": 2}` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Defaults to the available parallelism.
    pub workers: usize,
    /// Maximum number of queued (not yet running) tasks. `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// Prefix for worker thread names; workers are suffixed `-0`, `-1`, ...
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, usize::from),
            queue_capacity: None,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl PoolConfig {
    /// Config with `workers` threads and otherwise default settings.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Sets the queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads the pool config, falling back to [`PoolConfig::default`] when absent.
    pub fn load_pool(&self) -> Result<PoolConfig, ConfigError> {
        Ok(self.load(POOL_CONFIG_KEY)?.unwrap_or_default())
    }
}
