//! `skein search`: Run retrieval against a JSONL memory pool.
//!
//! No provider is involved: the smart path expands the query with the
//! deterministic fallback rewrites.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use skein_agent::{ContextRetriever, QueryRewriter, RetrievedContext, context::format_context};
use skein_config::RetrievalConfig;
use skein_memory::JsonFilePool;

use super::load_config;

pub async fn run(
    config_path: Option<&Path>,
    pool: Option<PathBuf>,
    query: &str,
    user: &str,
    prompt: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pool_path = pool.unwrap_or_else(JsonFilePool::default_path);
    tracing::debug!(pool = %pool_path.display(), user, "Searching memory pool");

    let retrieved = retrieve(&pool_path, query, user, config.retrieval.clone()).await?;
    if prompt {
        let block = format_context(&retrieved.results, &config.retrieval.content_type);
        if block.is_empty() {
            eprintln!("No memories found for \"{query}\"");
        } else {
            println!("{}", block.trim_start());
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&retrieved)?);
    }
    Ok(())
}

async fn retrieve(
    pool_path: &Path,
    query: &str,
    user: &str,
    config: RetrievalConfig,
) -> anyhow::Result<RetrievedContext> {
    let pool = JsonFilePool::new(pool_path.to_path_buf())
        .with_context(|| format!("Failed to open memory pool {}", pool_path.display()))?;
    let retriever = ContextRetriever::new(Arc::new(pool), QueryRewriter::offline(), config);
    let retrieved = retriever
        .retrieve(user, query, &[])
        .await
        .context("Retrieval failed")?;
    Ok(retrieved)
}
