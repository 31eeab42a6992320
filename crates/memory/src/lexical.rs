//! Lexical scoring of query variants against a pool of recent facts.
//!
//! Each fact is scored per variant as
//! `0.75 · jaccard + 0.25 · recency + keyword_boost − 0.02 · variant_index`,
//! where recency is `1 − rank / pool_size` over the pool's record order.
//! Pairs with no shared tokens never produce a result.

use futures::future::join_all;
use skein_core::memory::{MemoryRecord, SearchResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LEXICAL_WEIGHT: f32 = 0.75;
pub const RECENCY_WEIGHT: f32 = 0.25;
/// Added when a shared token is longer than [`BOOST_MIN_TOKEN_LEN`] chars.
pub const KEYWORD_BOOST: f32 = 0.05;
pub const BOOST_MIN_TOKEN_LEN: usize = 4;
/// Per-index penalty so the original phrasing wins ties.
pub const VARIANT_PENALTY: f32 = 0.02;

pub const FALLBACK_BASE: f32 = 0.25;
pub const FALLBACK_RECENCY_WEIGHT: f32 = 0.15;
pub const FALLBACK_LABEL: &str = "recency";

/// Lowercase, split on anything non-alphanumeric, drop 1-char tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(String::from)
        .collect()
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two token sets. Two empty sets score 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let intersection = a.intersection(b).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

/// Combine score components for one (variant, fact) pair.
pub fn combine_score(lexical: f32, recency: f32, boosted: bool, variant_index: usize) -> f32 {
    let boost = if boosted { KEYWORD_BOOST } else { 0.0 };
    let base = (LEXICAL_WEIGHT * lexical + RECENCY_WEIGHT * recency + boost).min(1.0);
    (base - VARIANT_PENALTY * variant_index as f32).max(0.0)
}

/// One phrasing of the user's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVariant {
    pub label: String,
    pub text: String,
}

impl QueryVariant {
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            label: "original".into(),
            text: text.into(),
        }
    }

    pub fn rewrite(n: usize, text: impl Into<String>) -> Self {
        Self {
            label: format!("rewrite-{n}"),
            text: text.into(),
        }
    }
}

/// A single fact flattened out of its record, tokenized once.
#[derive(Debug, Clone)]
pub struct PoolFact {
    pub memory_id: String,
    pub fact: String,
    pub thread_id: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Position of the owning record, 0 = most recent
    pub rank: usize,
    tokens: HashSet<String>,
}

/// The candidate facts for one retrieval call.
#[derive(Debug, Clone, Default)]
pub struct FactPool {
    facts: Vec<PoolFact>,
    records: usize,
}

impl FactPool {
    /// Flatten records (most recent first) into a scorable pool.
    pub fn from_records(records: &[MemoryRecord]) -> Self {
        let facts = records
            .iter()
            .enumerate()
            .flat_map(|(rank, record)| {
                record
                    .facts
                    .iter()
                    .filter(|f| !f.trim().is_empty())
                    .map(move |fact| PoolFact {
                        memory_id: record.id.clone(),
                        fact: fact.clone(),
                        thread_id: record.thread_id.clone(),
                        timestamp: record.timestamp,
                        rank,
                        tokens: token_set(fact),
                    })
            })
            .collect();
        Self {
            facts,
            records: records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn facts(&self) -> &[PoolFact] {
        &self.facts
    }

    pub fn recency_weight(&self, rank: usize) -> f32 {
        if self.records == 0 {
            return 0.0;
        }
        1.0 - rank as f32 / self.records as f32
    }

    fn to_result(&self, fact: &PoolFact, score: f32, label: &str) -> SearchResult {
        SearchResult {
            memory_id: fact.memory_id.clone(),
            fact: fact.fact.clone(),
            score,
            source_query_label: label.to_string(),
            thread_id: fact.thread_id.clone(),
            timestamp: fact.timestamp,
        }
    }

    /// Score every fact against one variant, in pool order.
    pub fn score_variant(&self, variant_index: usize, variant: &QueryVariant) -> Vec<SearchResult> {
        let query = token_set(&variant.text);
        if query.is_empty() {
            return Vec::new();
        }

        self.facts
            .iter()
            .filter_map(|fact| {
                let lexical = jaccard(&query, &fact.tokens);
                if lexical == 0.0 {
                    return None;
                }
                let boosted = query
                    .intersection(&fact.tokens)
                    .any(|t| t.chars().count() >= BOOST_MIN_TOKEN_LEN);
                let score = combine_score(
                    lexical,
                    self.recency_weight(fact.rank),
                    boosted,
                    variant_index,
                );
                Some(self.to_result(fact, score, &variant.label))
            })
            .collect()
    }

    /// Recency-only candidates, used when no variant overlaps anything.
    pub fn recency_fallback(&self) -> Vec<SearchResult> {
        self.facts
            .iter()
            .map(|fact| {
                let score = FALLBACK_BASE + FALLBACK_RECENCY_WEIGHT * self.recency_weight(fact.rank);
                self.to_result(fact, score, FALLBACK_LABEL)
            })
            .collect()
    }
}

/// Score all variants concurrently; results are concatenated in variant
/// order so that downstream tie-breaking is deterministic.
pub async fn parallel_search(pool: Arc<FactPool>, variants: &[QueryVariant]) -> Vec<SearchResult> {
    let tasks = variants.iter().cloned().enumerate().map(|(index, variant)| {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.score_variant(index, &variant))
    });

    let mut results = Vec::new();
    for (variant, outcome) in variants.iter().zip(join_all(tasks).await) {
        match outcome {
            Ok(scored) => {
                debug!(label = %variant.label, hits = scored.len(), "Scored query variant");
                results.extend(scored);
            }
            Err(e) => warn!(label = %variant.label, error = %e, "Variant scoring task failed"),
        }
    }
    results
}
