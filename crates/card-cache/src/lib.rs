//! Persistent two-tier cache for remotely sourced card collections
//!
//! - [`CollectionCacheStore`] keeps one versioned JSON snapshot per data
//!   source and classifies it as fresh, stale or expired by age.
//! - [`ImageByteStore`] keeps image bytes keyed by URL under a byte quota,
//!   evicting the least recently used images to make room.
//! - [`CacheStatsAggregator`] summarizes both for display.
//!
//! Both stores sit on a [`PersistenceBackend`] and fail open: storage
//! problems are logged and surface as misses or skipped writes, never as
//! errors to the caller.

pub mod backend;
pub mod clock;
pub mod codec;
pub mod collections;
pub mod config;
pub mod error;
pub mod evictor;
pub mod images;
pub mod stats;

pub use backend::{FileBackend, MemoryBackend, PersistenceBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Envelope, EnvelopeHeader};
pub use collections::{
    CachedCollection, CollectionCacheStore, CollectionEntryInfo, FreshnessReport, FreshnessStatus,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use evictor::{EvictionCandidate, EvictionPlan, QuotaEvictor};
pub use images::{ImageByteStore, ImageCacheStats, ImageRecord, PutOutcome};
pub use stats::{CacheStatsAggregator, CacheSummary, CollectionSummary};
