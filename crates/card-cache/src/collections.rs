//! Collection snapshot tier
//!
//! One JSON envelope per data source, classified as fresh, stale or expired
//! by age. Reads never fail: anything that cannot be served is a miss, and
//! entries that can never be served again (expired, wrong format version,
//! corrupt) are deleted on the way out.

use crate::backend::PersistenceBackend;
use crate::clock::{age_between, Clock};
use crate::codec::{self, EnvelopeHeader};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const COLLECTION_PREFIX: &str = "collection:";

/// Age bucket of a collection entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    Expired,
    Missing,
}

impl FreshnessStatus {
    pub fn classify(age: Duration, stale_threshold: Duration, max_age: Duration) -> Self {
        if age >= max_age {
            FreshnessStatus::Expired
        } else if age >= stale_threshold {
            FreshnessStatus::Stale
        } else {
            FreshnessStatus::Fresh
        }
    }

    /// Whether an entry in this state may be handed to a caller
    pub fn is_usable(&self) -> bool {
        matches!(self, FreshnessStatus::Fresh | FreshnessStatus::Stale)
    }
}

/// Result of a non-destructive freshness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessReport {
    pub status: FreshnessStatus,
    pub written_at: Option<DateTime<Utc>>,
    pub age_ms: Option<u64>,
}

impl FreshnessReport {
    fn missing() -> Self {
        Self {
            status: FreshnessStatus::Missing,
            written_at: None,
            age_ms: None,
        }
    }

    pub fn age(&self) -> Option<Duration> {
        self.age_ms.map(Duration::from_millis)
    }
}

/// A payload read from the cache together with its age classification
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCollection<T> {
    pub payload: T,
    pub written_at: DateTime<Utc>,
    pub status: FreshnessStatus,
}

impl<T> CachedCollection<T> {
    /// Whether the caller should consider refetching
    pub fn needs_revalidation(&self) -> bool {
        self.status == FreshnessStatus::Stale
    }
}

/// Listing row for a usable entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionEntryInfo {
    pub key: String,
    pub written_at: DateTime<Utc>,
    pub age_secs: u64,
    pub status: FreshnessStatus,
    pub size_bytes: u64,
}

/// Versioned, TTL-classified store for collection snapshots
pub struct CollectionCacheStore {
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CollectionCacheStore {
    pub fn new(
        backend: Arc<dyn PersistenceBackend>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            backend,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Backend key for a data source identity such as `owner/repo/path`
    pub fn cache_key(source_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        format!("{}{}", COLLECTION_PREFIX, hex::encode(hasher.finalize()))
    }

    /// Store a snapshot, replacing whatever was cached for `source_id`
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn put<T: Serialize>(&self, source_id: &str, payload: &T) {
        let key = Self::cache_key(source_id);
        let result = async {
            let bytes = codec::encode(payload, &self.config.format_version, self.clock.now())?;
            self.backend.put_bytes(&key, &bytes).await?;
            Ok::<_, CacheError>(bytes.len())
        }
        .await;

        match result {
            Ok(size) => debug!(source_id, key = %key, size, "Cached collection"),
            Err(e) => warn!(source_id, key = %key, error = %e, "Failed to cache collection"),
        }
    }

    /// Cached payload for `source_id`, if present and younger than the configured max age
    pub async fn get<T: DeserializeOwned>(&self, source_id: &str) -> Option<T> {
        self.get_with_max_age(source_id, self.config.max_age).await
    }

    /// Like [`get`](Self::get) with a caller-chosen max age
    pub async fn get_with_max_age<T: DeserializeOwned>(
        &self,
        source_id: &str,
        max_age: Duration,
    ) -> Option<T> {
        self.get_entry_with_max_age(source_id, max_age)
            .await
            .map(|entry| entry.payload)
    }

    /// Cached payload along with when it was written and how fresh it is
    pub async fn get_entry<T: DeserializeOwned>(
        &self,
        source_id: &str,
    ) -> Option<CachedCollection<T>> {
        self.get_entry_with_max_age(source_id, self.config.max_age)
            .await
    }

    pub async fn get_entry_with_max_age<T: DeserializeOwned>(
        &self,
        source_id: &str,
        max_age: Duration,
    ) -> Option<CachedCollection<T>> {
        let key = Self::cache_key(source_id);

        match self.read_entry(&key, max_age).await {
            Ok(Some(entry)) => {
                debug!(source_id, status = ?entry.status, "Collection cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(source_id, "Collection cache miss");
                None
            }
            Err(e) => {
                self.discard_unreadable(&key, &e).await;
                None
            }
        }
    }

    async fn read_entry<T: DeserializeOwned>(
        &self,
        key: &str,
        max_age: Duration,
    ) -> Result<Option<CachedCollection<T>>> {
        let Some(bytes) = self.backend.get_bytes(key).await? else {
            return Ok(None);
        };

        let envelope = codec::decode::<T>(&bytes, &self.config.format_version)?;
        let age = age_between(envelope.written_at, self.clock.now());

        if age >= max_age {
            debug!(key, age_secs = age.as_secs(), "Collection entry expired");
            self.delete_quietly(key).await;
            return Ok(None);
        }

        Ok(Some(CachedCollection {
            payload: envelope.payload,
            written_at: envelope.written_at,
            status: FreshnessStatus::classify(age, self.config.stale_threshold, max_age),
        }))
    }

    /// Log a read failure and drop the entry if its content is at fault
    async fn discard_unreadable(&self, key: &str, error: &CacheError) {
        match error {
            CacheError::VersionMismatch { found, expected } => {
                debug!(key, found = %found, expected = %expected, "Dropping collection entry with old format");
                self.delete_quietly(key).await;
            }
            CacheError::CorruptEntry(reason) => {
                warn!(key, reason = %reason, "Dropping corrupt collection entry");
                self.delete_quietly(key).await;
            }
            other => {
                warn!(key, error = %other, "Collection cache read failed, treating as miss");
            }
        }
    }

    async fn delete_quietly(&self, key: &str) {
        if let Err(e) = self.backend.delete_key(key).await {
            warn!(key, error = %e, "Failed to delete collection entry");
        }
    }

    /// Classify the entry for `source_id` without modifying anything
    pub async fn get_freshness(&self, source_id: &str) -> FreshnessReport {
        let key = Self::cache_key(source_id);

        let bytes = match self.backend.get_bytes(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return FreshnessReport::missing(),
            Err(e) => {
                warn!(source_id, error = %e, "Freshness probe failed");
                return FreshnessReport::missing();
            }
        };

        match self.current_header(&bytes) {
            Some(header) => {
                let age = age_between(header.written_at, self.clock.now());
                FreshnessReport {
                    status: self.classify(age),
                    written_at: Some(header.written_at),
                    age_ms: Some(age.as_millis().min(u64::MAX as u128) as u64),
                }
            }
            None => FreshnessReport::missing(),
        }
    }

    /// Header of an entry written with the current format version
    fn current_header(&self, bytes: &[u8]) -> Option<EnvelopeHeader> {
        codec::decode_header(bytes)
            .ok()
            .filter(|h| h.format_version == self.config.format_version)
    }

    fn classify(&self, age: Duration) -> FreshnessStatus {
        FreshnessStatus::classify(age, self.config.stale_threshold, self.config.max_age)
    }

    /// Remove the entry for one source
    pub async fn clear(&self, source_id: &str) {
        let key = Self::cache_key(source_id);
        self.delete_quietly(&key).await;
        info!(source_id, "Cleared collection cache entry");
    }

    /// Remove every collection entry, returning how many were deleted
    pub async fn clear_all(&self) -> usize {
        let keys = match self.backend.list_keys(COLLECTION_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list collection entries for clear");
                return 0;
            }
        };

        let mut removed = 0;
        for key in &keys {
            match self.backend.delete_key(key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to delete collection entry"),
            }
        }
        info!(removed, "Cleared collection cache");
        removed
    }

    /// Usable entries (current format version, not expired), oldest first
    ///
    /// Nothing is deleted; unusable entries are simply left out.
    pub async fn list_entries(&self) -> Vec<CollectionEntryInfo> {
        let keys = match self.backend.list_keys(COLLECTION_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list collection entries");
                return Vec::new();
            }
        };

        let now = self.clock.now();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = match self.backend.get_bytes(&key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read collection entry");
                    continue;
                }
            };
            let Some(header) = self.current_header(&bytes) else {
                continue;
            };
            let age = age_between(header.written_at, now);
            let status = self.classify(age);
            if status.is_usable() {
                entries.push(CollectionEntryInfo {
                    key,
                    written_at: header.written_at,
                    age_secs: age.as_secs(),
                    status,
                    size_bytes: bytes.len() as u64,
                });
            }
        }
        entries.sort_by(|a, b| a.written_at.cmp(&b.written_at).then(a.key.cmp(&b.key)));
        entries
    }

    /// Delete expired, corrupt and old-format entries, returning how many went
    pub async fn prune_expired(&self) -> usize {
        let keys = match self.backend.list_keys(COLLECTION_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list collection entries for pruning");
                return 0;
            }
        };

        let now = self.clock.now();
        let mut removed = 0;
        for key in keys {
            let bytes = match self.backend.get_bytes(&key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read collection entry");
                    continue;
                }
            };
            let keep = self
                .current_header(&bytes)
                .map(|h| self.classify(age_between(h.written_at, now)).is_usable())
                .unwrap_or(false);
            if keep {
                continue;
            }
            match self.backend.delete_key(&key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to prune collection entry"),
            }
        }
        if removed > 0 {
            info!(removed, "Pruned collection cache");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Collection {
        title: String,
        cards: Vec<String>,
    }

    fn collection(title: &str) -> Collection {
        Collection {
            title: title.to_string(),
            cards: vec!["Ace".to_string(), "King".to_string()],
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        store: CollectionCacheStore,
    }

    fn fixture(config: CacheConfig) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = CollectionCacheStore::new(backend.clone(), clock.clone(), config);
        Fixture {
            backend,
            clock,
            store,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let stale = HOUR;
        let max = 24 * HOUR;
        assert_eq!(
            FreshnessStatus::classify(Duration::ZERO, stale, max),
            FreshnessStatus::Fresh
        );
        assert_eq!(
            FreshnessStatus::classify(stale - Duration::from_millis(1), stale, max),
            FreshnessStatus::Fresh
        );
        assert_eq!(
            FreshnessStatus::classify(stale, stale, max),
            FreshnessStatus::Stale
        );
        assert_eq!(
            FreshnessStatus::classify(max, stale, max),
            FreshnessStatus::Expired
        );
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = CollectionCacheStore::cache_key("owner/repo/birds.json");
        let b = CollectionCacheStore::cache_key("owner/repo/birds.json");
        let c = CollectionCacheStore::cache_key("owner/repo/fish.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(COLLECTION_PREFIX));
        assert_eq!(a.len(), COLLECTION_PREFIX.len() + 64);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let f = fixture(CacheConfig::default());
        f.store.put("abc", &collection("Birds")).await;

        let got: Option<Collection> = f.store.get("abc").await;
        assert_eq!(got, Some(collection("Birds")));

        let entry = f.store.get_entry::<Collection>("abc").await.unwrap();
        assert_eq!(entry.status, FreshnessStatus::Fresh);
        assert!(!entry.needs_revalidation());
    }

    #[tokio::test]
    async fn test_put_replaces_previous_entry() {
        let f = fixture(CacheConfig::default());
        f.store.put("abc", &collection("Birds")).await;
        f.store.put("abc", &collection("Fish")).await;

        let got: Option<Collection> = f.store.get("abc").await;
        assert_eq!(got.unwrap().title, "Fish");
        assert_eq!(f.backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_fresh_stale_expired_lifecycle() {
        let f = fixture(CacheConfig::default());
        f.store.put("abc", &collection("Birds")).await;
        assert_eq!(
            f.store.get_freshness("abc").await.status,
            FreshnessStatus::Fresh
        );

        f.clock.advance(Duration::from_secs(90 * 60));
        let report = f.store.get_freshness("abc").await;
        assert_eq!(report.status, FreshnessStatus::Stale);
        assert_eq!(report.age(), Some(Duration::from_secs(90 * 60)));

        // Stale entries are still served
        let entry = f.store.get_entry::<Collection>("abc").await.unwrap();
        assert!(entry.needs_revalidation());

        f.clock.advance(24 * HOUR);
        assert_eq!(
            f.store.get_freshness("abc").await.status,
            FreshnessStatus::Expired
        );
        // The probe did not delete anything
        assert_eq!(f.backend.len().await, 1);

        let got: Option<Collection> = f.store.get("abc").await;
        assert!(got.is_none());
        assert!(f.backend.is_empty().await);
        assert_eq!(
            f.store.get_freshness("abc").await.status,
            FreshnessStatus::Missing
        );
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let f = fixture(CacheConfig::default());
        f.store.put("abc", &collection("Birds")).await;

        let mut last = FreshnessStatus::Fresh;
        let rank = |s: FreshnessStatus| match s {
            FreshnessStatus::Fresh => 0,
            FreshnessStatus::Stale => 1,
            FreshnessStatus::Expired => 2,
            FreshnessStatus::Missing => 3,
        };
        for _ in 0..30 {
            f.clock.advance(HOUR);
            let status = f.store.get_freshness("abc").await.status;
            assert!(rank(status) >= rank(last));
            last = status;
        }
        assert_eq!(last, FreshnessStatus::Expired);
    }

    #[tokio::test]
    async fn test_custom_max_age() {
        let f = fixture(CacheConfig::default());
        f.store.put("abc", &collection("Birds")).await;
        f.clock.advance(2 * HOUR);

        let got: Option<Collection> = f.store.get_with_max_age("abc", 3 * HOUR).await;
        assert!(got.is_some());

        let got: Option<Collection> = f.store.get_with_max_age("abc", HOUR).await;
        assert!(got.is_none());
        assert!(f.backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_removed() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::default());
        let v1 = CollectionCacheStore::new(
            backend.clone(),
            clock.clone(),
            CacheConfig::default().with_format_version("v1"),
        );
        let v2 = CollectionCacheStore::new(
            backend.clone(),
            clock.clone(),
            CacheConfig::default().with_format_version("v2"),
        );

        v1.put("abc", &collection("Birds")).await;
        assert_eq!(
            v2.get_freshness("abc").await.status,
            FreshnessStatus::Missing
        );
        assert_eq!(backend.len().await, 1);

        let got: Option<Collection> = v2.get("abc").await;
        assert!(got.is_none());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_removed() {
        let f = fixture(CacheConfig::default());
        let key = CollectionCacheStore::cache_key("abc");
        f.backend.insert_raw(&key, b"{\"payload\": [".to_vec()).await;

        assert_eq!(
            f.store.get_freshness("abc").await.status,
            FreshnessStatus::Missing
        );
        let got: Option<Collection> = f.store.get("abc").await;
        assert!(got.is_none());
        assert!(f.backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_a_miss() {
        let f = fixture(CacheConfig::default());
        f.backend.set_available(false);

        f.store.put("abc", &collection("Birds")).await;
        let got: Option<Collection> = f.store.get("abc").await;
        assert!(got.is_none());
        assert_eq!(
            f.store.get_freshness("abc").await.status,
            FreshnessStatus::Missing
        );
        f.store.clear("abc").await;
        assert_eq!(f.store.clear_all().await, 0);
        assert!(f.store.list_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_clear_all() {
        let f = fixture(CacheConfig::default());
        f.store.put("a", &collection("A")).await;
        f.store.put("b", &collection("B")).await;
        f.store.put("c", &collection("C")).await;
        f.backend.insert_raw("image:meta:zz", b"{}".to_vec()).await;

        f.store.clear("a").await;
        assert!(f.store.get::<Collection>("a").await.is_none());
        assert!(f.store.get::<Collection>("b").await.is_some());

        assert_eq!(f.store.clear_all().await, 2);
        assert_eq!(f.store.clear_all().await, 0);
        // Other tiers are untouched
        assert_eq!(f.backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_entries_skips_unusable() {
        let f = fixture(CacheConfig::default());
        f.store.put("old", &collection("Old")).await;
        f.clock.advance(2 * HOUR);
        f.store.put("new", &collection("New")).await;
        f.backend
            .insert_raw(&CollectionCacheStore::cache_key("bad"), b"garbage".to_vec())
            .await;

        let entries = f.store.list_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, CollectionCacheStore::cache_key("old"));
        assert_eq!(entries[0].status, FreshnessStatus::Stale);
        assert_eq!(entries[0].age_secs, 2 * 3600);
        assert_eq!(entries[1].status, FreshnessStatus::Fresh);
        assert!(entries[1].size_bytes > 0);

        // Listing is non-destructive
        assert_eq!(f.backend.len().await, 3);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let f = fixture(CacheConfig::default());
        f.store.put("old", &collection("Old")).await;
        f.clock.advance(23 * HOUR);
        f.store.put("new", &collection("New")).await;
        f.clock.advance(2 * HOUR);
        f.backend
            .insert_raw(&CollectionCacheStore::cache_key("bad"), b"garbage".to_vec())
            .await;

        assert_eq!(f.store.prune_expired().await, 2);
        assert_eq!(f.backend.len().await, 1);
        assert!(f.store.get::<Collection>("new").await.is_some());
        assert_eq!(f.store.prune_expired().await, 0);
    }
}
