//! `skein config`: Configuration management commands.

use std::path::{Path, PathBuf};

use skein_config::AppConfig;

use super::load_config;

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_file(path).display());
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating {}", config_file(path).display());

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   config error: {e:#}");
            return Err(e);
        }
    };

    println!("   ok");
    println!();
    println!("   Model:       {}", config.default_model);
    println!(
        "   Budgets:     {} iterations, {} per subagent, depth {}",
        config.agent.max_iterations,
        config.agent.subagent_max_iterations,
        config.agent.max_recursion_depth
    );
    println!(
        "   Escalation:  after {} failed steps",
        config.agent.escalation_threshold
    );
    println!(
        "   Retrieval:   top {} of {} records, min score {:.2}",
        config.retrieval.result_limit, config.retrieval.pool_limit, config.retrieval.min_score
    );
    println!("   Subagents:   {}", config.subagents.len());
    Ok(())
}

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
