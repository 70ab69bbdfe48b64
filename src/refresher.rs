//! Geolookup - Cache refresh after a reload
//!
//! Re-resolves every cached key against a freshly installed dataset. A key
//! that fails to re-resolve keeps its previous (possibly stale) value:
//! serving an old answer is preferred over dropping it.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::provider::{LookupProvider, QueryOutcome};
use crate::registry::DatasetHandle;

/// Counters from one refresh pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    /// Entries overwritten with a value from the new dataset.
    pub refreshed: usize,
    /// Entries left unchanged because re-resolution failed.
    pub failed: usize,
    /// Keys evicted between the snapshot and their update.
    pub vanished: usize,
    /// Entries past their TTL, dropped before the pass.
    pub expired: usize,
}

pub struct CacheRefresher<P: LookupProvider> {
    provider: Arc<P>,
    cache: Arc<ResultCache<P::Value>>,
}

impl<P: LookupProvider> CacheRefresher<P> {
    pub fn new(provider: Arc<P>, cache: Arc<ResultCache<P::Value>>) -> Self {
        Self { provider, cache }
    }

    /// Re-resolve every cached key against `handle`.
    ///
    /// Runs on the rayon pool and returns once every key was visited. Each
    /// entry is updated atomically on its own; concurrent readers may see a
    /// mix of refreshed and not-yet-refreshed keys.
    pub fn refresh(&self, handle: &DatasetHandle<P::Resource>) -> RefreshReport {
        let expired = self.cache.purge_expired();
        let keys = self.cache.keys();
        if keys.is_empty() {
            return RefreshReport {
                expired,
                ..Default::default()
            };
        }

        let mut report = keys
            .par_iter()
            .map(|key| match self.provider.query(&handle.resource, key) {
                QueryOutcome::Found(value) => {
                    if self.cache.refresh(key, value) {
                        RefreshReport {
                            refreshed: 1,
                            ..Default::default()
                        }
                    } else {
                        RefreshReport {
                            vanished: 1,
                            ..Default::default()
                        }
                    }
                }
                QueryOutcome::NotFound => {
                    warn!("Could not refresh entry {}: not in dataset {}", key, handle.id);
                    RefreshReport {
                        failed: 1,
                        ..Default::default()
                    }
                }
                QueryOutcome::Failed(reason) => {
                    warn!("Could not refresh entry {}: {}", key, reason);
                    RefreshReport {
                        failed: 1,
                        ..Default::default()
                    }
                }
            })
            .reduce(RefreshReport::default, |a, b| RefreshReport {
                refreshed: a.refreshed + b.refreshed,
                failed: a.failed + b.failed,
                vanished: a.vanished + b.vanished,
                expired: 0,
            });
        report.expired = expired;

        info!(
            "Refreshed {} cached entries from {} ({} failed, {} evicted meanwhile, {} expired)",
            report.refreshed, handle.source, report.failed, report.vanished, report.expired
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fixtures::{MapProvider, MapResource, FAIL_VALUE};
    use std::num::NonZeroUsize;
    use std::time::Duration;

    #[test]
    fn test_refresh_rewrites_and_keeps_failures() {
        let cache = Arc::new(ResultCache::new(
            NonZeroUsize::new(16).unwrap(),
            Duration::from_secs(60),
        ));
        cache.put("a", "a-old".to_string());
        cache.put("b", "b-old".to_string());
        cache.put("gone", "gone-old".to_string());

        let refresher = CacheRefresher::new(Arc::new(MapProvider), Arc::clone(&cache));
        let handle = DatasetHandle::new(
            "test",
            MapResource::new(&[("a", "a-new"), ("b", FAIL_VALUE)]),
            "v2",
        );

        let report = refresher.refresh(&handle);
        assert_eq!(
            report,
            RefreshReport {
                refreshed: 1,
                failed: 2,
                vanished: 0,
                expired: 0,
            }
        );
        assert_eq!(cache.get("a"), Some("a-new".to_string()));
        assert_eq!(cache.get("b"), Some("b-old".to_string()));
        assert_eq!(cache.get("gone"), Some("gone-old".to_string()));
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_refresh_empty_cache() {
        let cache: Arc<ResultCache<String>> = Arc::new(ResultCache::new(
            NonZeroUsize::new(4).unwrap(),
            Duration::from_secs(60),
        ));
        let refresher = CacheRefresher::new(Arc::new(MapProvider), cache);
        let handle = DatasetHandle::new("test", MapResource::new(&[("a", "1")]), "v1");
        assert_eq!(refresher.refresh(&handle), RefreshReport::default());
    }

    #[test]
    fn test_refresh_drops_expired_entries() {
        let cache = Arc::new(ResultCache::new(
            NonZeroUsize::new(4).unwrap(),
            Duration::from_millis(40),
        ));
        cache.put("a", "a-old".to_string());
        std::thread::sleep(Duration::from_millis(80));
        cache.put("b", "b-old".to_string());

        let refresher = CacheRefresher::new(Arc::new(MapProvider), Arc::clone(&cache));
        let handle = DatasetHandle::new(
            "test",
            MapResource::new(&[("a", "a-new"), ("b", "b-new")]),
            "v2",
        );

        let report = refresher.refresh(&handle);
        assert_eq!(report.expired, 1);
        assert_eq!(report.refreshed, 1);
        // The expired key is gone rather than revived by the new dataset
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some("b-new".to_string()));
    }
}
