//! Memory search tool: lets the model explicitly search the caller's
//! long-term memory pool.
//!
//! This bridges the tool gateway with the memory pool. The query is scored
//! lexically against the caller's recent facts and merged with the same
//! dedupe/diversity rules the context pipeline uses.

use async_trait::async_trait;
use serde_json::json;
use skein_core::error::ToolError;
use skein_core::identity::CallerIdentity;
use skein_core::memory::MemoryPoolSource;
use skein_core::tool::{ToolBackend, ToolKind};
use skein_memory::lexical::{FactPool, QueryVariant};
use skein_memory::merge::{MergeOptions, merge_results};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on the `limit` argument.
const MAX_LIMIT: usize = 50;

/// Backend for the `memory_search` tool.
pub struct MemorySearchBackend {
    pool: Arc<dyn MemoryPoolSource>,
    pool_limit: usize,
    options: MergeOptions,
}

impl MemorySearchBackend {
    pub fn new(pool: Arc<dyn MemoryPoolSource>) -> Self {
        Self {
            pool,
            pool_limit: 50,
            options: MergeOptions::default(),
        }
    }

    /// How many recent records to score against.
    pub fn with_pool_limit(mut self, pool_limit: usize) -> Self {
        self.pool_limit = pool_limit;
        self
    }

    pub fn with_merge_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl ToolBackend for MemorySearchBackend {
    async fn invoke(
        &self,
        arguments: &serde_json::Value,
        caller: &CallerIdentity,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = arguments["limit"]
            .as_u64()
            .map(|n| (n as usize).min(MAX_LIMIT))
            .unwrap_or(self.options.limit);

        let records = self
            .pool
            .fetch_recent_facts(&caller.user_id, self.pool_limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: ToolKind::MemorySearch.name().into(),
                reason: e.to_string(),
            })?;

        let pool = FactPool::from_records(&records);
        let candidates = pool.score_variant(0, &QueryVariant::original(query));
        let options = MergeOptions {
            limit,
            ..self.options
        };
        let results = merge_results(candidates, &options);

        debug!(
            user_id = %caller.user_id,
            pool = pool.len(),
            hits = results.len(),
            "Memory search complete"
        );

        if results.is_empty() {
            return Ok(json!({
                "results": [],
                "message": format!("No memories found matching '{query}'."),
            }));
        }

        Ok(json!({ "results": results }))
    }
}
