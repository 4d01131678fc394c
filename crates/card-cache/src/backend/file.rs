//! Directory-backed storage, one file per key

use super::PersistenceBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

const TMP_SUFFIX: &str = ".tmp";

/// Backend that stores each key as a file under `root`
///
/// File names are the hex encoding of the key so listings can recover the
/// original keys. Values are written to a temporary file and renamed into
/// place, so a reader never observes a half-written value.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileBackend {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Ensure the root directory exists and remove temporary files left by
    /// interrupted writes
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let mut swept = 0usize;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(TMP_SUFFIX) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => swept += 1,
                Err(e) => {
                    warn!(file = ?entry.path(), error = %e, "Failed to remove stale temporary file")
                }
            }
        }

        info!(root = ?self.root, swept, "File backend initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn key_for(file_name: &str) -> Option<String> {
        if file_name.ends_with(TMP_SUFFIX) {
            return None;
        }
        let raw = hex::decode(file_name).ok()?;
        String::from_utf8(raw).ok()
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}{}", seq, TMP_SUFFIX));

        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(key, size = bytes.len(), "Wrote file");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match Self::key_for(name) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => {
                    if !name.ends_with(TMP_SUFFIX) {
                        warn!(file = name, "Ignoring unrecognised file in cache directory");
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
