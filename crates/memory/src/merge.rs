//! Merge, dedupe and diversity-boost ranked search results.
//!
//! The merge is a fixed point: feeding its output back in (with no new
//! candidates) returns the same set.

use skein_core::memory::SearchResult;
use std::collections::HashSet;

use crate::lexical::{jaccard, token_set};

/// Word-set similarity at or above which two facts count as the same.
pub const NEAR_DUPLICATE_THRESHOLD: f32 = 0.95;

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Drop results scoring below this
    pub min_score: f32,
    /// Result budget
    pub limit: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            min_score: 0.1,
            limit: 8,
        }
    }
}

/// Case-insensitive, trimmed form used for exact duplicate detection.
pub fn normalize_fact(fact: &str) -> String {
    fact.trim().to_lowercase()
}

/// Collapse duplicates, apply the score threshold, rank, and fill the
/// budget with diversity boosting.
///
/// Candidates are ranked by score with ties kept in input order, so the
/// higher-scoring (or earlier) instance of a duplicate always survives.
pub fn merge_results(mut candidates: Vec<SearchResult>, options: &MergeOptions) -> Vec<SearchResult> {
    if options.limit == 0 {
        return Vec::new();
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen_exact: HashSet<String> = HashSet::new();
    let mut kept: Vec<(SearchResult, HashSet<String>)> = Vec::new();

    for candidate in candidates {
        if candidate.score < options.min_score {
            continue;
        }
        if !seen_exact.insert(normalize_fact(&candidate.fact)) {
            continue;
        }
        let tokens = token_set(&candidate.fact);
        let near_duplicate = kept
            .iter()
            .any(|(_, other)| jaccard(&tokens, other) >= NEAR_DUPLICATE_THRESHOLD);
        if near_duplicate {
            continue;
        }
        kept.push((candidate, tokens));
    }

    let ranked: Vec<SearchResult> = kept.into_iter().map(|(r, _)| r).collect();
    diversify(ranked, options.limit)
}

/// Greedily take results from sources not yet represented until half the
/// budget is filled, then backfill purely by rank. Output keeps rank order.
fn diversify(ranked: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    if ranked.len() <= limit {
        return ranked;
    }

    let diverse_slots = limit.div_ceil(2);
    let mut selected = vec![false; ranked.len()];
    let mut taken = 0;
    let mut seen_sources: HashSet<&str> = HashSet::new();

    for (i, result) in ranked.iter().enumerate() {
        if taken >= diverse_slots {
            break;
        }
        let thread = result.thread_id.as_deref();
        let fresh = !seen_sources.contains(result.memory_id.as_str())
            && thread.is_none_or(|t| !seen_sources.contains(t));
        if fresh {
            seen_sources.insert(result.memory_id.as_str());
            if let Some(t) = thread {
                seen_sources.insert(t);
            }
            selected[i] = true;
            taken += 1;
        }
    }

    for flag in selected.iter_mut() {
        if taken >= limit {
            break;
        }
        if !*flag {
            *flag = true;
            taken += 1;
        }
    }

    ranked
        .into_iter()
        .zip(selected)
        .filter_map(|(result, keep)| keep.then_some(result))
        .collect()
}
