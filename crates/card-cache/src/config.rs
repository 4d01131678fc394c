//! Cache configuration

use crate::error::{CacheError, Result};
use std::time::Duration;

pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(60 * 60); // 1 hour
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours
pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024; // 50MB
pub const DEFAULT_FORMAT_VERSION: &str = "1";

/// Tunables shared by both cache tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Collection entries older than this are reported as stale
    pub stale_threshold: Duration,
    /// Collection entries at or past this age are dropped
    pub max_age: Duration,
    /// Upper bound on the summed size of cached images
    pub quota_bytes: u64,
    /// Tag written into every collection envelope
    pub format_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            max_age: DEFAULT_MAX_AGE,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
        }
    }
}

impl CacheConfig {
    /// Read overrides from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stale_threshold = std::env::var("CARD_CACHE_STALE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_threshold);

        let max_age = std::env::var("CARD_CACHE_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_age);

        let quota_bytes = std::env::var("CARD_CACHE_QUOTA_BYTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.quota_bytes);

        let format_version = std::env::var("CARD_CACHE_FORMAT_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.format_version);

        Self {
            stale_threshold,
            max_age,
            quota_bytes,
            format_version,
        }
    }

    pub fn with_quota_bytes(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn with_format_version(mut self, version: impl Into<String>) -> Self {
        self.format_version = version.into();
        self
    }

    pub fn with_ttl(mut self, stale_threshold: Duration, max_age: Duration) -> Self {
        self.stale_threshold = stale_threshold;
        self.max_age = max_age;
        self
    }

    /// Reject combinations that would make freshness classification meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_age.is_zero() {
            return Err(CacheError::Config("max_age must be non-zero".to_string()));
        }
        if self.stale_threshold > self.max_age {
            return Err(CacheError::Config(format!(
                "stale_threshold ({}s) exceeds max_age ({}s)",
                self.stale_threshold.as_secs(),
                self.max_age.as_secs()
            )));
        }
        if self.format_version.trim().is_empty() {
            return Err(CacheError::Config(
                "format_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
