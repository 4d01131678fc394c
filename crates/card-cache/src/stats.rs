//! Read-only summaries across both tiers

use crate::collections::{CollectionCacheStore, CollectionEntryInfo, FreshnessStatus};
use crate::images::{ImageByteStore, ImageCacheStats};
use serde::Serialize;
use std::sync::Arc;

/// Summary of the collection tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub count: usize,
    pub fresh: usize,
    pub stale: usize,
    pub total_bytes: u64,
    pub oldest_age_secs: Option<u64>,
    pub newest_age_secs: Option<u64>,
}

impl CollectionSummary {
    fn from_entries(entries: &[CollectionEntryInfo]) -> Self {
        Self {
            count: entries.len(),
            fresh: entries
                .iter()
                .filter(|e| e.status == FreshnessStatus::Fresh)
                .count(),
            stale: entries
                .iter()
                .filter(|e| e.status == FreshnessStatus::Stale)
                .count(),
            total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            oldest_age_secs: entries.iter().map(|e| e.age_secs).max(),
            newest_age_secs: entries.iter().map(|e| e.age_secs).min(),
        }
    }
}

/// Display-ready snapshot of the whole cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub collections: CollectionSummary,
    pub images: ImageCacheStats,
}

pub struct CacheStatsAggregator {
    collections: Arc<CollectionCacheStore>,
    images: Arc<ImageByteStore>,
}

impl CacheStatsAggregator {
    pub fn new(collections: Arc<CollectionCacheStore>, images: Arc<ImageByteStore>) -> Self {
        Self {
            collections,
            images,
        }
    }

    pub async fn summarize(&self) -> CacheSummary {
        let entries = self.collections.list_entries().await;
        CacheSummary {
            collections: CollectionSummary::from_entries(&entries),
            images: self.images.stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use std::time::Duration;

    struct Fixture {
        aggregator: CacheStatsAggregator,
        collections: Arc<CollectionCacheStore>,
        images: Arc<ImageByteStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::default());
        let config = CacheConfig::default().with_quota_bytes(200);
        let collections = Arc::new(CollectionCacheStore::new(
            backend.clone(),
            clock.clone(),
            config.clone(),
        ));
        let images = Arc::new(ImageByteStore::new(backend, clock.clone(), &config));
        Fixture {
            aggregator: CacheStatsAggregator::new(collections.clone(), images.clone()),
            collections,
            images,
            clock,
        }
    }

    #[tokio::test]
    async fn test_summary_of_empty_cache() {
        let f = fixture();
        let summary = f.aggregator.summarize().await;
        assert_eq!(summary.collections, CollectionSummary::default());
        assert_eq!(summary.images.count, 0);
        assert_eq!(summary.images.quota_bytes, 200);
        assert_eq!(summary.images.usage_percent, 0.0);
    }

    #[tokio::test]
    async fn test_summary_combines_tiers() {
        let Fixture {
            aggregator,
            collections,
            images,
            clock,
        } = fixture();

        collections.put("owner/repo/old", &vec!["a", "b"]).await;
        clock.advance(Duration::from_secs(2 * 60 * 60));
        collections.put("owner/repo/new", &vec!["c"]).await;
        collections.put("owner/repo/gone", &vec!["d"]).await;
        clock.advance(Duration::from_secs(60));
        collections.clear("owner/repo/gone").await;

        images.put("https://img/1.png", &[0u8; 50]).await;

        let summary = aggregator.summarize().await;
        assert_eq!(summary.collections.count, 2);
        assert_eq!(summary.collections.fresh, 1);
        assert_eq!(summary.collections.stale, 1);
        assert_eq!(summary.collections.oldest_age_secs, Some(2 * 60 * 60 + 60));
        assert_eq!(summary.collections.newest_age_secs, Some(60));
        assert!(summary.collections.total_bytes > 0);

        assert_eq!(summary.images.count, 1);
        assert_eq!(summary.images.total_size_bytes, 50);
        assert_eq!(summary.images.usage_percent, 25.0);
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let f = fixture();
        f.images.put("https://img/1.png", &[1u8; 20]).await;

        let json = serde_json::to_value(f.aggregator.summarize().await).unwrap();
        assert_eq!(json["images"]["total_size_bytes"], 20);
        assert_eq!(json["collections"]["count"], 0);
        assert!(json["collections"]["oldest_age_secs"].is_null());
    }
}
