//! Persistence backends
//!
//! The stores only ever talk to storage through [`PersistenceBackend`], an
//! asynchronous key to bytes map with no size limit and no expiry of its own.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use async_trait::async_trait;

/// Durable key/value storage used by both cache tiers
///
/// Implementations must tolerate many concurrent operations on distinct keys.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value
    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the value stored under `key`
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete_key(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}
