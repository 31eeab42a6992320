//! File-based memory pool backed by JSON-lines storage.
//!
//! Each line is one record tagged with its owner:
//! `{"user_id": "...", "id": "...", "facts": [...], "thread_id": "...", "timestamp": "..."}`.
//!
//! Storage location: `~/.skein/memory/pool.jsonl`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skein_core::error::MemoryError;
use skein_core::memory::{MemoryPoolSource, MemoryRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    user_id: String,
    #[serde(flatten)]
    record: MemoryRecord,
}

/// A read-mostly pool loaded from a JSONL file.
///
/// Records are served newest first by timestamp; records without a
/// timestamp sort after dated ones, keeping their file order.
pub struct JsonFilePool {
    path: PathBuf,
    entries: Arc<RwLock<Vec<StoredRecord>>>,
}

impl JsonFilePool {
    /// Open the pool at `path`. A missing file is an empty pool.
    pub fn new(path: PathBuf) -> Result<Self, MemoryError> {
        let entries = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), count = entries.len(), "File memory pool loaded");
        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Default path: `~/.skein/memory/pool.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".skein").join("memory").join("pool.jsonl")
    }

    fn load_from_disk(path: &Path) -> Result<Vec<StoredRecord>, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let mut entries: Vec<StoredRecord> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredRecord>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory record");
                    None
                }
            })
            .collect();

        // Newest first; undated records keep file order at the end.
        entries.sort_by(|a, b| match (a.record.timestamp, b.record.timestamp) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(entries)
    }

    /// Re-read the file, replacing the in-memory view.
    pub async fn reload(&self) -> Result<usize, MemoryError> {
        let fresh = Self::load_from_disk(&self.path)?;
        let count = fresh.len();
        *self.entries.write().await = fresh;
        Ok(count)
    }
}

#[async_trait]
impl MemoryPoolSource for JsonFilePool {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn fetch_recent_facts(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .map(|e| e.record.clone())
            .collect())
    }
}
