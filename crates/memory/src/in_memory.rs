//! In-memory pool for tests and ephemeral sessions.

use async_trait::async_trait;
use skein_core::error::MemoryError;
use skein_core::memory::{MemoryPoolSource, MemoryRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A pool that keeps each user's records in a Vec, most recent first.
pub struct InMemoryPool {
    records: Arc<RwLock<HashMap<String, Vec<MemoryRecord>>>>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a user's pool. `records` must already be most-recent-first.
    pub async fn with_records(self, user_id: &str, records: Vec<MemoryRecord>) -> Self {
        self.records.write().await.insert(user_id.to_string(), records);
        self
    }

    /// Record a new memory as the most recent one.
    pub async fn remember(&self, user_id: &str, record: MemoryRecord) {
        self.records
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(0, record);
    }
}

impl Default for InMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryPoolSource for InMemoryPool {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn fetch_recent_facts(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records
            .get(user_id)
            .map(|r| r.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
