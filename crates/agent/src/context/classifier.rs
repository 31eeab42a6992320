//! Heuristic query classification.
//!
//! Decides whether an incoming message can be answered with a single direct
//! retrieval or benefits from query expansion. Purely lexical: no model call.

use serde::{Deserialize, Serialize};
use skein_core::message::{Message, Role};

/// Phrases that point back at earlier conversation.
const BACKWARD_PHRASES: &[&str] = &[
    "remind me",
    "what we discussed",
    "we discussed",
    "we talked",
    "you said",
    "you told me",
    "i told you",
    "i mentioned",
    "last time",
    "earlier",
    "previously",
    "before that",
];

/// Connectors that usually join two separate questions.
const CLAUSE_MARKERS: &[&str] = &[" and also ", " as well as ", " and what ", " and how ", " also ", "; "];

/// Openers of short follow-ups that lean on the previous turn.
const FOLLOW_UP_OPENERS: &[&str] = &["what about", "how about", "and ", "also ", "why", "then "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Self-contained and specific
    Simple,
    /// Refers back to earlier conversation
    Conversational,
    /// Several questions in one message
    MultiPart,
    /// Long or open-ended
    Exploratory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub is_complex: bool,
    pub query_type: QueryType,
    /// Heuristic confidence in [0, 1]
    pub confidence: f32,
    pub needs_rewrite: bool,
}

impl QueryAnalysis {
    fn new(query_type: QueryType, confidence: f32) -> Self {
        let is_complex = query_type != QueryType::Simple;
        Self {
            is_complex,
            query_type,
            confidence,
            needs_rewrite: is_complex,
        }
    }
}

/// Lexical classifier for incoming queries.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    /// Queries with more words than this are exploratory
    long_query_words: usize,
    /// Queries with at most this many words may be follow-ups
    follow_up_words: usize,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self {
            long_query_words: 12,
            follow_up_words: 5,
        }
    }
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `query` given the most recent conversation turns.
    pub fn classify(&self, query: &str, recent_turns: &[Message]) -> QueryAnalysis {
        let normalized = format!(" {} ", query.trim().to_lowercase());
        let words = query.split_whitespace().count();

        if BACKWARD_PHRASES.iter().any(|p| normalized.contains(p)) {
            return QueryAnalysis::new(QueryType::Conversational, 0.9);
        }

        let questions = query.matches('?').count();
        if questions > 1 || CLAUSE_MARKERS.iter().any(|m| normalized.contains(m)) {
            return QueryAnalysis::new(QueryType::MultiPart, 0.8);
        }

        if words > self.long_query_words {
            return QueryAnalysis::new(QueryType::Exploratory, 0.7);
        }

        let has_prior_turn = recent_turns
            .iter()
            .any(|m| m.role == Role::Assistant && !m.content.trim().is_empty());
        let trimmed = normalized.trim_start();
        if has_prior_turn
            && words <= self.follow_up_words
            && FOLLOW_UP_OPENERS.iter().any(|o| trimmed.starts_with(o))
        {
            return QueryAnalysis::new(QueryType::Conversational, 0.6);
        }

        QueryAnalysis::new(QueryType::Simple, 0.8)
    }
}
