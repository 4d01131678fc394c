//! Configuration for the cache admin tool

use card_cache::CacheConfig;
use std::path::PathBuf;

/// Where the cache lives and how it is tuned
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub cache_dir: PathBuf,
    pub cache: CacheConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/cards"),
            cache: CacheConfig::default(),
        }
    }
}
