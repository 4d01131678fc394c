//! Quota-bounded image byte tier
//!
//! Each image is stored as two backend records keyed by the SHA-256 of its
//! URL: the raw bytes under `image:blob:` and a small JSON record with the
//! URL, size and last access time under `image:meta:`. A hit rewrites only the
//! metadata record.
//!
//! The running byte total lives next to the in-memory index behind one mutex,
//! and every path that changes what is stored (put, delete, evict, clear)
//! updates both while holding it. Reads fetch bytes without the lock and only
//! take it to record the access.

use crate::backend::PersistenceBackend;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::evictor::{EvictionCandidate, QuotaEvictor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const IMAGE_PREFIX: &str = "image:";
const BLOB_PREFIX: &str = "image:blob:";
const META_PREFIX: &str = "image:meta:";

/// Persisted metadata for one cached image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub url: String,
    pub size_bytes: u64,
    pub last_accessed_at: DateTime<Utc>,
}

/// Statistics about the image tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageCacheStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub quota_bytes: u64,
    pub usage_percent: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// What happened to a `put`
#[derive(Debug)]
pub enum PutOutcome {
    Stored {
        /// An entry for the URL already existed and was overwritten
        replaced: bool,
        /// URLs removed to make room, oldest access first
        evicted: Vec<String>,
    },
    /// Nothing was written and the store is unchanged apart from evictions
    Rejected(CacheError),
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored { .. })
    }
}

#[derive(Debug, Default)]
struct ImageIndex {
    entries: HashMap<String, ImageRecord>,
    total_size_bytes: u64,
}

impl ImageIndex {
    fn insert(&mut self, record: ImageRecord) {
        self.total_size_bytes += record.size_bytes;
        if let Some(previous) = self.entries.insert(record.url.clone(), record) {
            self.total_size_bytes -= previous.size_bytes;
        }
    }

    fn remove(&mut self, url: &str) -> Option<ImageRecord> {
        let record = self.entries.remove(url)?;
        self.total_size_bytes -= record.size_bytes;
        Some(record)
    }
}

fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

fn blob_key(digest: &str) -> String {
    format!("{}{}", BLOB_PREFIX, digest)
}

fn meta_key(digest: &str) -> String {
    format!("{}{}", META_PREFIX, digest)
}

/// URL-keyed image cache with LRU eviction under a byte quota
pub struct ImageByteStore {
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
    quota_bytes: u64,
    index: Mutex<ImageIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ImageByteStore {
    /// Create a store with an empty index
    ///
    /// Use [`open`](Self::open) when the backend may already hold images.
    pub fn new(
        backend: Arc<dyn PersistenceBackend>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            backend,
            clock,
            quota_bytes: config.quota_bytes,
            index: Mutex::new(ImageIndex::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a store and rebuild its index from what the backend holds
    pub async fn open(
        backend: Arc<dyn PersistenceBackend>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        let store = Self::new(backend, clock, config);
        if let Err(e) = store.reload().await {
            warn!(error = %e, "Failed to list image cache records, starting empty");
        }
        store
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Rebuild the index from metadata records
    ///
    /// Per-key failures drop that key and carry on, so whatever gets loaded
    /// is always brought back under the quota before the lock is released.
    async fn reload(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        *index = ImageIndex::default();

        let blob_digests: HashSet<String> = self
            .backend
            .list_keys(BLOB_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(BLOB_PREFIX).map(str::to_string))
            .collect();
        let meta_keys = self.backend.list_keys(META_PREFIX).await?;

        let mut dropped = 0usize;
        for key in meta_keys {
            let Some(digest) = key.strip_prefix(META_PREFIX) else {
                continue;
            };
            let record = match self.backend.get_bytes(&key).await {
                Ok(Some(bytes)) => serde_json::from_slice::<ImageRecord>(&bytes).ok(),
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read image metadata");
                    None
                }
            };

            match record {
                Some(record)
                    if url_digest(&record.url) == digest && blob_digests.contains(digest) =>
                {
                    index.insert(record);
                }
                _ => {
                    warn!(key = %key, "Dropping unusable image metadata");
                    if let Err(e) = self.backend.delete_key(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete image metadata");
                    }
                    dropped += 1;
                }
            }
        }

        let live: HashSet<String> = index.entries.keys().map(|u| url_digest(u)).collect();
        for digest in blob_digests.difference(&live) {
            debug!(digest = %digest, "Removing orphaned image blob");
            if let Err(e) = self.backend.delete_key(&blob_key(digest)).await {
                warn!(digest = %digest, error = %e, "Failed to delete orphaned image blob");
            }
            dropped += 1;
        }

        let needed = index.total_size_bytes.saturating_sub(self.quota_bytes);
        let evicted = match self.evict_locked(&mut index, needed, None).await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(
                    error = %e,
                    "Could not shrink image cache to quota, forgetting oldest entries"
                );
                Self::forget_over_quota(&mut index, self.quota_bytes)
            }
        };

        info!(
            entries = index.entries.len(),
            total_size = index.total_size_bytes,
            dropped,
            evicted = evicted.len(),
            "Image cache index loaded"
        );
        Ok(())
    }

    /// Drop least recently used entries from the index alone until it fits
    ///
    /// Their records stay in the backend and are reconsidered by the next `open`.
    fn forget_over_quota(index: &mut ImageIndex, quota_bytes: u64) -> Vec<String> {
        let needed = index.total_size_bytes.saturating_sub(quota_bytes);
        let plan = QuotaEvictor::plan(
            index.entries.values().map(|r| EvictionCandidate {
                key: &r.url,
                size_bytes: r.size_bytes,
                last_accessed_at: r.last_accessed_at,
            }),
            needed,
        );
        for url in &plan.victims {
            index.remove(url);
        }
        plan.victims
    }

    /// Cached bytes for `url`, marking it as most recently used
    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        let record = {
            let index = self.index.lock().await;
            index.entries.get(url).cloned()
        };

        let Some(record) = record else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(url, "Image cache miss");
            return None;
        };

        let digest = url_digest(url);
        let bytes = match self.backend.get_bytes(&blob_key(&digest)).await {
            Ok(Some(bytes)) if bytes.len() as u64 == record.size_bytes => bytes,
            Ok(found) => {
                warn!(
                    url,
                    expected = record.size_bytes,
                    found = found.map(|b| b.len()),
                    "Cached image missing or truncated, removing entry"
                );
                let mut index = self.index.lock().await;
                // A concurrent put may already have replaced the entry
                if index.entries.get(url) == Some(&record) {
                    if let Err(e) = self.remove_locked(&mut index, url).await {
                        warn!(url, error = %e, "Failed to remove broken image entry");
                    }
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to read cached image, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        self.touch(url, &digest).await;
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(url, size = bytes.len(), "Image cache hit");
        Some(bytes)
    }

    /// Record an access; the entry may have been removed while bytes were read
    async fn touch(&self, url: &str, digest: &str) {
        let now = self.clock.now();
        let mut index = self.index.lock().await;
        let Some(record) = index.entries.get_mut(url) else {
            return;
        };
        if now > record.last_accessed_at {
            record.last_accessed_at = now;
        }

        let persisted = serde_json::to_vec(&*record).map_err(CacheError::from);
        let result = match persisted {
            Ok(bytes) => self.backend.put_bytes(&meta_key(digest), &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(url, error = %e, "Failed to persist image access time");
        }
    }

    /// Whether `url` is cached, without affecting eviction order
    pub async fn contains(&self, url: &str) -> bool {
        self.index.lock().await.entries.contains_key(url)
    }

    /// Cache `bytes` for `url`, evicting least recently used images if needed
    pub async fn put(&self, url: &str, bytes: &[u8]) -> PutOutcome {
        let size = bytes.len() as u64;
        if size > self.quota_bytes {
            debug!(url, size, quota = self.quota_bytes, "Image larger than quota, not caching");
            return PutOutcome::Rejected(CacheError::QuotaUnsatisfiable {
                size_bytes: size,
                quota_bytes: self.quota_bytes,
            });
        }

        let mut index = self.index.lock().await;
        let existing = index.entries.get(url).map(|r| r.size_bytes);
        let total_without = index.total_size_bytes - existing.unwrap_or(0);
        let needed = QuotaEvictor::bytes_needed(total_without, size, self.quota_bytes);

        let evicted = match self.evict_locked(&mut index, needed, Some(url)).await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(url, error = %e, "Could not make room for image");
                return PutOutcome::Rejected(e);
            }
        };

        let record = ImageRecord {
            url: url.to_string(),
            size_bytes: size,
            last_accessed_at: self.clock.now(),
        };
        if let Err(e) = self.write_locked(&mut index, &record, bytes).await {
            warn!(url, error = %e, "Failed to cache image");
            return PutOutcome::Rejected(e);
        }

        debug!(
            url,
            size,
            total_size = index.total_size_bytes,
            evicted = evicted.len(),
            "Cached image"
        );
        PutOutcome::Stored {
            replaced: existing.is_some(),
            evicted,
        }
    }

    async fn write_locked(
        &self,
        index: &mut ImageIndex,
        record: &ImageRecord,
        bytes: &[u8],
    ) -> Result<()> {
        let digest = url_digest(&record.url);
        let meta = serde_json::to_vec(record)?;

        self.backend.put_bytes(&blob_key(&digest), bytes).await?;
        if let Err(e) = self.backend.put_bytes(&meta_key(&digest), &meta).await {
            // The blob no longer matches any previous metadata, so drop both
            for key in [blob_key(&digest), meta_key(&digest)] {
                if let Err(e) = self.backend.delete_key(&key).await {
                    warn!(key = %key, error = %e, "Failed to delete partially written image");
                }
            }
            index.remove(&record.url);
            return Err(e);
        }

        index.insert(record.clone());
        Ok(())
    }

    /// Free at least `needed` bytes, never touching `keep`
    async fn evict_locked(
        &self,
        index: &mut ImageIndex,
        needed: u64,
        keep: Option<&str>,
    ) -> Result<Vec<String>> {
        if needed == 0 {
            return Ok(Vec::new());
        }

        let plan = QuotaEvictor::plan(
            index
                .entries
                .values()
                .filter(|r| Some(r.url.as_str()) != keep)
                .map(|r| EvictionCandidate {
                    key: &r.url,
                    size_bytes: r.size_bytes,
                    last_accessed_at: r.last_accessed_at,
                }),
            needed,
        );
        if !plan.satisfied {
            return Err(CacheError::QuotaUnsatisfiable {
                size_bytes: needed,
                quota_bytes: self.quota_bytes,
            });
        }

        let mut evicted = Vec::with_capacity(plan.victims.len());
        for url in plan.victims {
            self.remove_locked(index, &url).await?;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(url = %url, "Evicted least recently used image");
            evicted.push(url);
        }
        Ok(evicted)
    }

    /// Delete an entry from the backend and the index together
    ///
    /// The entry stays indexed if its metadata cannot be deleted. A blob left
    /// behind after that point is swept as an orphan by the next `open`.
    async fn remove_locked(&self, index: &mut ImageIndex, url: &str) -> Result<Option<u64>> {
        if !index.entries.contains_key(url) {
            return Ok(None);
        }

        let digest = url_digest(url);
        self.backend.delete_key(&meta_key(&digest)).await?;
        if let Err(e) = self.backend.delete_key(&blob_key(&digest)).await {
            warn!(url, error = %e, "Failed to delete image blob");
        }
        Ok(index.remove(url).map(|r| r.size_bytes))
    }

    /// Remove one image, returning whether it was cached
    pub async fn delete(&self, url: &str) -> bool {
        let mut index = self.index.lock().await;
        match self.remove_locked(&mut index, url).await {
            Ok(Some(size)) => {
                debug!(url, size, "Deleted cached image");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(url, error = %e, "Failed to delete cached image");
                false
            }
        }
    }

    /// Remove every image
    ///
    /// Entries whose deletion fails stay cached and counted.
    pub async fn clear(&self) {
        let mut index = self.index.lock().await;

        let urls: Vec<String> = index.entries.keys().cloned().collect();
        let mut failed = 0usize;
        for url in &urls {
            if let Err(e) = self.remove_locked(&mut index, url).await {
                warn!(url = %url, error = %e, "Failed to delete cached image");
                failed += 1;
            }
        }

        // Records that never made it into the index
        match self.backend.list_keys(IMAGE_PREFIX).await {
            Ok(keys) => {
                let live: HashSet<String> =
                    index.entries.keys().map(|u| url_digest(u)).collect();
                for key in keys {
                    let tracked = key
                        .strip_prefix(BLOB_PREFIX)
                        .or_else(|| key.strip_prefix(META_PREFIX))
                        .map(|digest| live.contains(digest))
                        .unwrap_or(false);
                    if tracked {
                        continue;
                    }
                    if let Err(e) = self.backend.delete_key(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete stray image record");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list image records during clear"),
        }

        info!(
            removed = urls.len() - failed,
            failed,
            "Cleared image cache"
        );
    }

    /// Current occupancy and counters
    pub async fn stats(&self) -> ImageCacheStats {
        let index = self.index.lock().await;
        let usage_percent = if self.quota_bytes == 0 {
            0.0
        } else {
            index.total_size_bytes as f64 / self.quota_bytes as f64 * 100.0
        };

        ImageCacheStats {
            count: index.entries.len(),
            total_size_bytes: index.total_size_bytes,
            quota_bytes: self.quota_bytes,
            usage_percent,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Recompute the byte total from the index and compare with the running total
    pub async fn verify_accounting(&self) -> bool {
        let index = self.index.lock().await;
        let summed: u64 = index.entries.values().map(|r| r.size_bytes).sum();
        summed == index.total_size_bytes && summed <= self.quota_bytes
    }
}
