//! Geolookup - Dataset registry
//!
//! Holds the active handle per dataset identifier. Readers clone an `Arc`
//! under a short read lock, so a swap is atomic from their point of view:
//! they hold either the old handle or the new one, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::provider::Resource;

/// An immutable, loaded dataset.
#[derive(Debug)]
pub struct DatasetHandle<R> {
    pub id: String,
    pub resource: R,
    /// Human-readable description of where the data came from.
    pub source: String,
    pub loaded_at: SystemTime,
}

impl<R> DatasetHandle<R> {
    pub fn new(id: impl Into<String>, resource: R, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource,
            source: source.into(),
            loaded_at: SystemTime::now(),
        }
    }
}

/// Active handles keyed by dataset identifier.
pub struct DatasetRegistry<R> {
    handles: RwLock<HashMap<String, Arc<DatasetHandle<R>>>>,
}

impl<R: Resource> Default for DatasetRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> DatasetRegistry<R> {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// The active handle for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<DatasetHandle<R>>> {
        self.handles.read().get(id).cloned()
    }

    /// Install `handle` as the active handle for its identifier.
    ///
    /// Returns the handle it replaced. The superseded resource is released
    /// once the last reader drops its `Arc`.
    pub fn put(&self, handle: impl Into<Arc<DatasetHandle<R>>>) -> Option<Arc<DatasetHandle<R>>> {
        let handle = handle.into();
        let id = handle.id.clone();
        self.handles.write().insert(id, handle)
    }

    /// Close every active handle and empty the registry.
    ///
    /// Failures are collected; one failing close does not stop the rest.
    /// Returns the number of handles closed. Calling it again is a no-op.
    pub fn close_all(&self) -> Result<usize, RegistryError> {
        let drained: Vec<_> = self.handles.write().drain().collect();

        let mut failures = Vec::new();
        for (id, handle) in &drained {
            match handle.resource.close() {
                Ok(()) => info!("Closed dataset {}", id),
                Err(e) => {
                    warn!("Failed to close dataset {}: {}", id, e);
                    failures.push(format!("{}: {}", id, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(drained.len())
        } else {
            Err(RegistryError::Close { failures })
        }
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers with an active handle.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
