//! The context retrieval pipeline.
//!
//! classify → (rewrite) → parallel search → merge/dedupe/diversify →
//! recency fallback → format. The formatted block is appended to the system
//! prompt of a top-level run and cached for a short TTL.

use serde::Serialize;
use skein_config::RetrievalConfig;
use skein_core::error::MemoryError;
use skein_core::identity::CallerIdentity;
use skein_core::memory::{MemoryPoolSource, SearchResult};
use skein_core::message::Message;
use skein_memory::lexical::{FactPool, QueryVariant, parallel_search};
use skein_memory::merge::{MergeOptions, merge_results};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::ContextCache;
use super::classifier::{QueryAnalysis, QueryClassifier};
use super::rewriter::QueryRewriter;

/// Which retrieval path served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    /// One direct search with the query as written
    Fast,
    /// Search with model or fallback rewrites
    Smart,
}

/// Everything one retrieval produced.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub analysis: QueryAnalysis,
    pub path: RetrievalPath,
    pub variants: Vec<String>,
    pub results: Vec<SearchResult>,
    /// True when the results came from the recency-only fallback
    pub used_fallback: bool,
}

pub struct ContextRetriever {
    pool: Arc<dyn MemoryPoolSource>,
    classifier: QueryClassifier,
    rewriter: QueryRewriter,
    config: RetrievalConfig,
    cache: ContextCache,
}

impl ContextRetriever {
    pub fn new(
        pool: Arc<dyn MemoryPoolSource>,
        rewriter: QueryRewriter,
        config: RetrievalConfig,
    ) -> Self {
        let cache = ContextCache::new(
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_secs),
        );
        let rewriter = rewriter.with_max_variants(config.max_variants);
        Self {
            pool,
            classifier: QueryClassifier::new(),
            rewriter,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            min_score: self.config.min_score,
            limit: self.config.result_limit,
        }
    }

    /// Run the full pipeline for one query, uncached.
    pub async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        recent_turns: &[Message],
    ) -> Result<RetrievedContext, MemoryError> {
        let analysis = self.classifier.classify(query, recent_turns);
        let path = if self.config.smart_path_always || analysis.needs_rewrite {
            RetrievalPath::Smart
        } else {
            RetrievalPath::Fast
        };

        let variants = match path {
            RetrievalPath::Smart => self.rewriter.rewrite(query).await,
            RetrievalPath::Fast => vec![QueryVariant::original(query.trim())],
        };
        debug!(
            user_id,
            query_type = ?analysis.query_type,
            ?path,
            variants = variants.len(),
            "Retrieving context"
        );

        let records = self
            .pool
            .fetch_recent_facts(user_id, self.config.pool_limit)
            .await?;
        let pool = Arc::new(FactPool::from_records(&records));

        let options = self.merge_options();
        let mut results = Vec::new();
        let mut used_fallback = false;
        if !pool.is_empty() {
            let candidates = parallel_search(Arc::clone(&pool), &variants).await;
            results = merge_results(candidates, &options);
            if results.is_empty() {
                debug!(user_id, "No lexical matches, using recency fallback");
                results = merge_results(pool.recency_fallback(), &options);
                used_fallback = !results.is_empty();
            }
        }

        Ok(RetrievedContext {
            analysis,
            path,
            variants: variants.into_iter().map(|v| v.text).collect(),
            results,
            used_fallback,
        })
    }

    /// The formatted context block for a run, served from cache when fresh.
    ///
    /// Pool failures degrade to no context; they never fail the run.
    pub async fn context_for(
        &self,
        caller: &CallerIdentity,
        query: &str,
        recent_turns: &[Message],
    ) -> Option<String> {
        if let Some(block) = self.cache.get(&caller.user_id, query).await {
            debug!(user_id = %caller.user_id, "Context cache hit");
            return non_empty(block);
        }

        let retrieved = match self.retrieve(&caller.user_id, query, recent_turns).await {
            Ok(r) => r,
            Err(e) => {
                warn!(user_id = %caller.user_id, error = %e, "Context retrieval failed");
                return None;
            }
        };

        info!(
            user_id = %caller.user_id,
            facts = retrieved.results.len(),
            fallback = retrieved.used_fallback,
            "Context retrieved"
        );
        let block = format_context(&retrieved.results, &self.config.content_type);
        self.cache
            .insert(&caller.user_id, query, block.clone())
            .await;
        non_empty(block)
    }
}

fn non_empty(block: String) -> Option<String> {
    (!block.is_empty()).then_some(block)
}

/// Render results as a numbered fact list for the system prompt.
pub fn format_context(results: &[SearchResult], content_type: &str) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut ctx = format!("\n\n## Recalled Memories ({content_type})\n");
    for (i, result) in results.iter().enumerate() {
        ctx.push_str(&format!("{}. [score={:.2}] {}\n", i + 1, result.score, result.fact));
    }
    ctx
}
