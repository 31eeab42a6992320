//! `skein classify`: Show query analysis and the variants it expands to.

use std::path::Path;

use serde_json::json;
use skein_agent::{QueryClassifier, QueryRewriter, RetrievalPath};
use skein_config::RetrievalConfig;

use super::load_config;

pub async fn run(config_path: Option<&Path>, query: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let report = analyze(query, &config.retrieval).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn analyze(query: &str, config: &RetrievalConfig) -> serde_json::Value {
    let analysis = QueryClassifier::new().classify(query, &[]);
    let path = if config.smart_path_always || analysis.needs_rewrite {
        RetrievalPath::Smart
    } else {
        RetrievalPath::Fast
    };

    let variants = QueryRewriter::offline()
        .with_max_variants(config.max_variants)
        .rewrite(query)
        .await;

    json!({
        "query": query,
        "analysis": analysis,
        "path": path,
        "variants": variants
            .iter()
            .map(|v| json!({"label": v.label, "text": v.text}))
            .collect::<Vec<_>>(),
    })
}
