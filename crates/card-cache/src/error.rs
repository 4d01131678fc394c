//! Error types for the card cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// The persistence layer cannot be reached at all
    BackendUnavailable(String),
    Io(Box<std::io::Error>),
    /// Bytes exist under the key but do not decode
    CorruptEntry(String),
    /// The entry decodes but was written under another format version
    VersionMismatch { found: String, expected: String },
    /// A single item is larger than the whole quota
    QuotaUnsatisfiable { size_bytes: u64, quota_bytes: u64 },
    Serialization(String),
    Config(String),
}

impl CacheError {
    /// Whether the error came from the storage layer rather than the data
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, CacheError::BackendUnavailable(_) | CacheError::Io(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::CorruptEntry(msg) => write!(f, "Corrupt cache entry: {}", msg),
            CacheError::VersionMismatch { found, expected } => write!(
                f,
                "Format version mismatch: found {}, expected {}",
                found, expected
            ),
            CacheError::QuotaUnsatisfiable {
                size_bytes,
                quota_bytes,
            } => write!(
                f,
                "Item of {} bytes cannot fit in a {} byte quota",
                size_bytes, quota_bytes
            ),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
