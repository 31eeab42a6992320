//! Short-lived cache of formatted context blocks.
//!
//! Repeated turns within the TTL reuse the previous retrieval instead of
//! re-running the pipeline. Keys combine the user and the normalized query.

use moka::future::Cache;
use std::time::Duration;

pub struct ContextCache {
    /// `None` when the TTL is zero, which disables caching.
    cache: Option<Cache<String, String>>,
}

impl ContextCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build()
        });
        Self { cache }
    }

    fn key(user_id: &str, query: &str) -> String {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{user_id}\u{1f}{}", normalized.to_lowercase())
    }

    /// The cached block, if present and still fresh.
    pub async fn get(&self, user_id: &str, query: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        cache.get(&Self::key(user_id, query)).await
    }

    pub async fn insert(&self, user_id: &str, query: &str, block: String) {
        if let Some(cache) = &self.cache {
            cache.insert(Self::key(user_id, query), block).await;
        }
    }

    #[cfg(test)]
    async fn entry_count(&self) -> u64 {
        match &self.cache {
            Some(cache) => {
                cache.run_pending_tasks().await;
                cache.entry_count()
            }
            None => 0,
        }
    }
}
