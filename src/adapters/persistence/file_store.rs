//! JSON File Store - Cache Persistence Across Restarts
//!
//! Keeps the whole key space in memory and mirrors it to a single JSON
//! document on every mutation. Writes go to `<path>.tmp` first and are
//! renamed into place, so the file on disk is always a complete
//! snapshot (old or new, never partial).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::ports::cache_store::{KeyValueStore, StoredValue};

/// File-backed key/value store.
pub struct JsonFileStore {
    /// Final document path.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
    /// In-memory mirror; the lock also serializes file writes.
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`, loading any existing snapshot.
    ///
    /// A corrupt document is logged and replaced by an empty store rather
    /// than failing startup.
    #[instrument]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .context("Failed to create cache directory")?;
        }

        let entries = match fs::read_to_string(path).await {
            Ok(json) => match serde_json::from_str::<HashMap<String, StoredValue>>(&json) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cache file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No cache file found, starting fresh");
                HashMap::new()
            }
            Err(e) => return Err(e).context("Failed to read cache file"),
        };

        info!(path = %path.display(), entries = entries.len(), "Cache store opened");

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path: PathBuf::from(tmp),
            entries: Mutex::new(entries),
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &HashMap<String, StoredValue>) -> Result<()> {
        let json = serde_json::to_string(entries).context("Failed to serialize cache")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp cache file")?;

        fs::rename(&self.tmp_path, &self.path)
            .await
            .context("Failed to rename cache file")?;

        debug!(path = %self.path.display(), entries = entries.len(), "Cache flushed");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}
