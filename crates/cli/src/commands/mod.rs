pub mod classify;
pub mod config_cmd;
pub mod search;

use std::path::Path;

use anyhow::Context;
use skein_config::AppConfig;

/// Resolve configuration once: an explicit file or the default location,
/// with environment overrides applied either way.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => AppConfig::load().context("Failed to load config"),
    }
}
