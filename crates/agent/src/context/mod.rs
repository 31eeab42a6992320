//! Context retrieval: memory injected into the system prompt before a run.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Classify the query | [`classifier`] |
//! | Expand into variants | [`rewriter`] |
//! | Search, merge, fallback, format | [`retriever`] |
//! | Reuse recent blocks | [`cache`] |

pub mod cache;
pub mod classifier;
pub mod retriever;
pub mod rewriter;

pub use cache::ContextCache;
pub use classifier::{QueryAnalysis, QueryClassifier, QueryType};
pub use retriever::{ContextRetriever, RetrievalPath, RetrievedContext, format_context};
pub use rewriter::{QueryRewriter, fallback_variants};
