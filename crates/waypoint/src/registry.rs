// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Boxed lower-level error of a registry backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One key/value pair stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegistryEntry {
    /// Full key, such as `/shopsmart/production/services/auth/full_url`.
    pub key: String,

    /// Stored value.
    pub value: String,
}

impl RegistryEntry {
    /// Creates an entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Failures of a registry read.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The registry could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The registry refused the read.
    #[error("registry access denied: {0}")]
    AccessDenied(String),

    /// Anything else reported by the backend.
    #[error(transparent)]
    Other(BoxError),
}

/// A key/value store that can list every entry under a prefix in one call.
///
/// Implementations wrap a parameter store, a configuration service or, for local
/// development and tests, the [`InMemoryRegistry`]. An empty result means nothing was
/// registered under the prefix.
pub trait Registry: Send + Sync {
    /// Returns every entry whose key starts with `prefix`.
    ///
    /// The returned future must be [`Send`] for compatibility with multi-threaded
    /// async runtimes.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<RegistryEntry>, RegistryError>> + Send;
}

impl<R: Registry> Registry for Arc<R> {
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<RegistryEntry>, RegistryError>> + Send {
        (**self).list(prefix)
    }
}

/// A thread-safe registry held in memory.
///
/// # Examples
///
/// ```
/// # futures::executor::block_on(async {
/// use waypoint::{InMemoryRegistry, Registry};
///
/// let registry = InMemoryRegistry::new();
/// registry.put("/shop/dev/services/auth/full_url", "http://auth:8080");
/// registry.put("/other/key", "ignored");
///
/// let entries = registry.list("/shop/dev/services").await.unwrap();
/// assert_eq!(entries.len(), 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Registry for InMemoryRegistry {
    async fn list(&self, prefix: &str) -> Result<Vec<RegistryEntry>, RegistryError> {
        let entries = self.entries.read();

        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| RegistryEntry::new(key.clone(), value.clone()))
            .collect())
    }
}
