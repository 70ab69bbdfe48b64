//! Geolookup - Lookup orchestration
//!
//! `resolve` checks the result cache, then queries the active dataset
//! handle and caches successful answers. It never loads a dataset itself.
//! Concurrent misses for the same key are not coalesced; each caller
//! queries the provider and the last write wins.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::{debug, error};

use crate::cache::ResultCache;
use crate::error::LookupError;
use crate::provider::{LookupProvider, QueryOutcome};
use crate::registry::DatasetRegistry;

/// Snapshot of the service state, for health and stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub dataset_id: String,
    pub dataset_loaded: bool,
    /// Every dataset identifier with an active handle
    pub datasets: Vec<String>,
    pub source: Option<String>,
    pub loaded_at_unix: Option<u64>,
    pub cache_size: usize,
    pub cache_capacity: usize,
}

pub struct LookupService<P: LookupProvider> {
    dataset_id: String,
    provider: Arc<P>,
    registry: Arc<DatasetRegistry<P::Resource>>,
    cache: Arc<ResultCache<P::Value>>,
}

impl<P: LookupProvider> LookupService<P> {
    pub fn new(
        dataset_id: impl Into<String>,
        provider: Arc<P>,
        registry: Arc<DatasetRegistry<P::Resource>>,
        cache: Arc<ResultCache<P::Value>>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            provider,
            registry,
            cache,
        }
    }

    /// Resolve `key` against the active dataset.
    pub fn resolve(&self, key: &str) -> Result<P::Value, LookupError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }
        debug!("Cache miss for {}", key);

        let handle = self
            .registry
            .get(&self.dataset_id)
            .ok_or_else(|| LookupError::DatasetUnavailable(self.dataset_id.clone()))?;

        match self.provider.query(&handle.resource, key) {
            QueryOutcome::Found(value) => {
                self.cache.put(key, value.clone());
                Ok(value)
            }
            QueryOutcome::NotFound => Err(LookupError::NotFound(key.to_string())),
            QueryOutcome::Failed(message) => {
                error!("Unexpected error while resolving {}: {}", key, message);
                Err(LookupError::Provider {
                    key: key.to_string(),
                    message,
                })
            }
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let handle = self.registry.get(&self.dataset_id);
        ServiceStats {
            dataset_id: self.dataset_id.clone(),
            dataset_loaded: handle.is_some(),
            datasets: self.registry.ids(),
            source: handle.as_ref().map(|h| h.source.clone()),
            loaded_at_unix: handle.as_ref().and_then(|h| {
                h.loaded_at
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs())
            }),
            cache_size: self.cache.size(),
            cache_capacity: self.cache.capacity(),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache<P::Value>> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry<P::Resource>> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fixtures::{MapProvider, MapResource, FAIL_VALUE};
    use crate::registry::DatasetHandle;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn service() -> LookupService<MapProvider> {
        LookupService::new(
            "test",
            Arc::new(MapProvider),
            Arc::new(DatasetRegistry::new()),
            Arc::new(ResultCache::new(
                NonZeroUsize::new(8).unwrap(),
                Duration::from_secs(60),
            )),
        )
    }

    #[test]
    fn test_unavailable_without_dataset() {
        let service = service();
        assert_eq!(
            service.resolve("a"),
            Err(LookupError::DatasetUnavailable("test".into()))
        );
        assert!(!service.stats().dataset_loaded);
        assert!(service.stats().datasets.is_empty());
    }

    #[test]
    fn test_hit_is_served_from_cache() {
        let service = service();
        service
            .registry()
            .put(DatasetHandle::new("test", MapResource::new(&[("a", "1")]), "v1"));

        assert_eq!(service.resolve("a"), Ok("1".to_string()));
        assert_eq!(service.cache().size(), 1);

        // The dataset changes without a refresh: the cached answer still wins
        service
            .registry()
            .put(DatasetHandle::new("test", MapResource::new(&[("a", "2")]), "v2"));
        assert_eq!(service.resolve("a"), Ok("1".to_string()));
    }

    #[test]
    fn test_not_found_is_never_cached() {
        let service = service();
        service
            .registry()
            .put(DatasetHandle::new("test", MapResource::new(&[("a", "1")]), "v1"));

        assert_eq!(service.resolve("b"), Err(LookupError::NotFound("b".into())));
        assert_eq!(service.cache().size(), 0);

        service.registry().put(DatasetHandle::new(
            "test",
            MapResource::new(&[("a", "1"), ("b", "2")]),
            "v2",
        ));
        // Still not cached until someone resolves it
        assert!(service.cache().get("b").is_none());
        assert_eq!(service.resolve("b"), Ok("2".to_string()));
        assert_eq!(service.cache().get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_provider_error_is_not_cached() {
        let service = service();
        service
            .registry()
            .put(DatasetHandle::new("test", MapResource::new(&[("x", FAIL_VALUE)]), "v1"));

        match service.resolve("x") {
            Err(err @ LookupError::Provider { .. }) => assert_eq!(err.status_code(), -3),
            other => panic!("Expected provider error, got {:?}", other),
        }
        assert_eq!(service.cache().size(), 0);
    }

    #[test]
    fn test_stats() {
        let service = service();
        service
            .registry()
            .put(DatasetHandle::new("test", MapResource::new(&[("a", "1")]), "v1"));
        service.resolve("a").unwrap();

        let stats = service.stats();
        assert!(stats.dataset_loaded);
        assert_eq!(stats.datasets, vec!["test".to_string()]);
        assert_eq!(stats.source.as_deref(), Some("v1"));
        assert!(stats.loaded_at_unix.is_some());
        assert_eq!(stats.cache_size, 1);
        assert_eq!(stats.cache_capacity, 8);
    }
}
