//! Memory pool: the recent facts context retrieval ranks against.
//!
//! The pool is read-only from the runtime's perspective. Records come back
//! most-recent-first; a record's position in that order is its recency rank.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// One stored memory: a set of facts extracted from a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this memory
    pub id: String,

    /// Individual facts, each ranked on its own
    pub facts: Vec<String>,

    /// The thread the facts were extracted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// When this memory was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A ranked fact produced by one retrieval call. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory_id: String,
    pub fact: String,
    /// Relevance in [0, 1]
    pub score: f32,
    /// Which query variant (or fallback) produced this result
    pub source_query_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Source of recent memories for a user.
#[async_trait]
pub trait MemoryPoolSource: Send + Sync {
    /// The backend name (e.g., "in_memory", "json_file").
    fn name(&self) -> &str;

    /// Up to `limit` records for `user_id`, most recent first.
    async fn fetch_recent_facts(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_without_optional_fields() {
        let json = r#"{"id":"m1","facts":["likes tea"]}"#;
        let record: MemoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.facts, vec!["likes tea"]);
        assert!(record.thread_id.is_none());
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn search_result_serialization() {
        let result = SearchResult {
            memory_id: "m1".into(),
            fact: "prefers annual billing".into(),
            score: 0.8,
            source_query_label: "original".into(),
            thread_id: Some("t1".into()),
            timestamp: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("annual billing"));
        assert!(!json.contains("timestamp"));
    }
}
