//! Admin commands run against an on-disk cache

use crate::error::Result;
use crate::types::AdminConfig;
use card_cache::{
    CacheStatsAggregator, CollectionCacheStore, FileBackend, ImageByteStore, PersistenceBackend,
    SystemClock,
};
use clap::Subcommand;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print entry counts, sizes and quota usage for both tiers
    Stats,
    /// Show how fresh the cached snapshot of one data source is
    Freshness {
        /// Data source identity, e.g. owner/repo/path
        source_id: String,
    },
    /// Delete expired, corrupt and old-format collection entries
    Prune,
    /// Clear cached data (both tiers unless one is selected)
    Clear {
        #[arg(long)]
        collections: bool,
        #[arg(long)]
        images: bool,
    },
    /// Remove one cached image
    Evict {
        /// Image URL exactly as it was cached
        url: String,
    },
}

/// Both stores opened over the same directory
pub struct CacheHandle {
    pub collections: Arc<CollectionCacheStore>,
    pub images: Arc<ImageByteStore>,
}

impl CacheHandle {
    pub async fn open(config: &AdminConfig) -> Result<Self> {
        config.cache.validate()?;

        let files = FileBackend::new(config.cache_dir.clone());
        files.init().await?;
        let backend: Arc<dyn PersistenceBackend> = Arc::new(files);
        let clock = Arc::new(SystemClock);

        let collections = Arc::new(CollectionCacheStore::new(
            backend.clone(),
            clock.clone(),
            config.cache.clone(),
        ));
        let images = Arc::new(ImageByteStore::open(backend, clock, &config.cache).await);

        Ok(Self {
            collections,
            images,
        })
    }
}

/// Run one command, returning what should be printed
pub async fn run(handle: &CacheHandle, command: Command) -> Result<String> {
    match command {
        Command::Stats => {
            let aggregator =
                CacheStatsAggregator::new(handle.collections.clone(), handle.images.clone());
            Ok(serde_json::to_string_pretty(&aggregator.summarize().await)?)
        }
        Command::Freshness { source_id } => {
            let report = handle.collections.get_freshness(&source_id).await;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::Prune => {
            let removed = handle.collections.prune_expired().await;
            Ok(json!({ "removed": removed }).to_string())
        }
        Command::Clear {
            collections,
            images,
        } => {
            let both = !collections && !images;
            let mut removed_collections = 0;
            if collections || both {
                removed_collections = handle.collections.clear_all().await;
            }
            if images || both {
                handle.images.clear().await;
            }
            info!(
                collections = collections || both,
                images = images || both,
                "Cache cleared"
            );
            Ok(json!({
                "collections_removed": removed_collections,
                "images_remaining": handle.images.stats().await.count,
            })
            .to_string())
        }
        Command::Evict { url } => {
            let removed = handle.images.delete(&url).await;
            Ok(json!({ "url": url, "removed": removed }).to_string())
        }
    }
}
