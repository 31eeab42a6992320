//! Query expansion for the smart retrieval path.
//!
//! A model call proposes alternate phrasings of the user's query. When no
//! provider is configured, or the call fails or returns nothing usable, a
//! deterministic fallback produces a keyword expansion and a
//! perspective-shifted rewrite instead.

use skein_core::message::Message;
use skein_config::RetrievalConfig;
use skein_core::provider::{CompletionProvider, CompletionRequest};
use skein_memory::lexical::{QueryVariant, tokenize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fewest alternate phrasings a model reply must yield to be used.
pub const MIN_REWRITES: usize = 2;
/// Smallest variant cap: the original plus [`MIN_REWRITES`].
pub const MIN_VARIANTS: usize = 1 + MIN_REWRITES;
/// Most variants a rewrite returns, original included.
pub const MAX_VARIANTS: usize = 5;

const REWRITE_PROMPT: &str = "You rewrite search queries for a personal memory store. \
Given the user's message, reply with up to four alternative phrasings that would match \
how the relevant facts were written down. One phrasing per line, no numbering, no commentary.";

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "do", "does", "did", "of", "to",
    "in", "on", "at", "for", "with", "about", "and", "or", "but", "what", "which", "who", "whom",
    "when", "where", "why", "how", "that", "this", "these", "those", "it", "its", "me", "my", "i",
    "we", "our", "us", "you", "your", "can", "could", "would", "should", "will", "please", "tell",
    "remind", "discussed", "discuss", "talked", "said", "mentioned", "again", "earlier",
    "previously", "last", "time", "there", "any", "some",
];

/// Expands a query into several phrasings.
pub struct QueryRewriter {
    provider: Option<Arc<dyn CompletionProvider>>,
    model: String,
    max_variants: usize,
}

impl QueryRewriter {
    /// A rewriter that calls `provider` with `model`.
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
            max_variants: MAX_VARIANTS,
        }
    }

    /// A rewriter using the configured rewrite model, or `run_model` when
    /// none is set, capped at the configured variant count.
    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        config: &RetrievalConfig,
        run_model: &str,
    ) -> Self {
        let model = config
            .rewrite_model
            .clone()
            .unwrap_or_else(|| run_model.to_string());
        Self::new(provider, model).with_max_variants(config.max_variants)
    }

    /// A rewriter that only ever uses the deterministic fallback.
    pub fn offline() -> Self {
        Self {
            provider: None,
            model: String::new(),
            max_variants: MAX_VARIANTS,
        }
    }

    /// Cap the number of variants, original included (clamped to 3..=5).
    pub fn with_max_variants(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants.clamp(MIN_VARIANTS, MAX_VARIANTS);
        self
    }

    /// Variants for `query`, original first.
    pub async fn rewrite(&self, query: &str) -> Vec<QueryVariant> {
        let Some(provider) = &self.provider else {
            return fallback_variants(query, self.max_variants);
        };

        let request = CompletionRequest {
            model: self.model.clone(),
            system_prompt: REWRITE_PROMPT.to_string(),
            history: vec![Message::user(query)],
            tools: vec![],
            temperature: 0.3,
        };

        match provider.complete_text(request).await {
            Ok(reply) => {
                let rewrites = parse_rewrites(&reply);
                let variants = assemble(query, rewrites, self.max_variants);
                if variants.len() > MIN_REWRITES {
                    debug!(count = variants.len(), "Model rewrite produced variants");
                    return variants;
                }
                warn!(
                    rewrites = variants.len() - 1,
                    "Model rewrite returned too few usable phrasings, using fallback"
                );
            }
            Err(e) => warn!(error = %e, "Query rewrite failed, using fallback"),
        }
        fallback_variants(query, self.max_variants)
    }
}

/// One phrasing per non-empty line, with list markers and quotes stripped.
fn parse_rewrites(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            strip_list_marker(line.trim())
                .trim()
                .trim_matches('"')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Drop a leading "1." / "2)" / "-" / "*" marker.
fn strip_list_marker(line: &str) -> &str {
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let line = match after_digits.strip_prefix(['.', ')']) {
        Some(rest) if after_digits.len() < line.len() => rest,
        _ => line,
    };
    line.trim_start_matches(['-', '*', '•'])
}

/// Original first, then unique rewrites, capped at `max`.
fn assemble(query: &str, rewrites: Vec<String>, max: usize) -> Vec<QueryVariant> {
    let mut seen = HashSet::new();
    seen.insert(query.trim().to_lowercase());

    let mut variants = vec![QueryVariant::original(query.trim())];
    for text in rewrites {
        if variants.len() >= max {
            break;
        }
        if seen.insert(text.to_lowercase()) {
            variants.push(QueryVariant::rewrite(variants.len(), text));
        }
    }
    variants
}

/// Deterministic expansion: keywords only, then a perspective rewrite.
///
/// A one-word query may yield fewer than [`MIN_REWRITES`] distinct
/// phrasings; this is the last resort, so whatever survives is used.
pub fn fallback_variants(query: &str, max: usize) -> Vec<QueryVariant> {
    let keywords = keywords(query);
    let mut rewrites = Vec::new();

    if !keywords.is_empty() {
        rewrites.push(keywords.join(" "));
    }
    let perspective = perspective_rewrite(query);
    if perspective.to_lowercase() != query.trim().to_lowercase() {
        rewrites.push(perspective);
    }
    let topic = if keywords.is_empty() {
        query.trim().to_string()
    } else {
        keywords.join(" ")
    };
    rewrites.push(format!("facts about {topic}"));

    assemble(query, rewrites, max.clamp(MIN_VARIANTS, MAX_VARIANTS))
}

fn keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Restate a first-person query from the memory store's point of view,
/// where facts are written about "the user".
fn perspective_rewrite(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            let swapped = match bare.to_lowercase().as_str() {
                "i" | "me" | "myself" | "we" | "us" => Some("the user"),
                "my" | "mine" | "our" | "ours" => Some("the user's"),
                "am" => Some("is"),
                _ => None,
            };
            match swapped {
                Some(s) if !bare.is_empty() => word.replacen(bare, s, 1),
                _ => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
