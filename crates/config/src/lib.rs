//! Configuration loading, validation, and management for Skein.
//!
//! Loads configuration from `~/.skein/config.toml` with environment
//! variable overrides. Everything is resolved once in [`AppConfig::load`];
//! the runtime receives the resolved values and never consults the
//! environment itself.

use serde::{Deserialize, Serialize};
use skein_core::subagent::{SubagentDefinition, SubagentRegistry};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.skein/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model for top-level runs
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Subagents reachable through the `task` tool
    #[serde(default)]
    pub subagents: Vec<SubagentDefinition>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration budget for top-level runs
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Iteration budget for nested subagent runs
    #[serde(default = "default_subagent_max_iterations")]
    pub subagent_max_iterations: u32,

    /// Cap on subagent nesting, at most [`MAX_RECURSION_DEPTH`]
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,

    /// Failed steps in one job before it is escalated to `blocked`
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-attempt timeout for tool backends (unset = no timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_subagent_max_iterations() -> u32 {
    5
}
/// Deepest subagent nesting any configuration may allow.
pub const MAX_RECURSION_DEPTH: u32 = 3;

fn default_max_recursion_depth() -> u32 {
    MAX_RECURSION_DEPTH
}
fn default_escalation_threshold() -> usize {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            subagent_max_iterations: default_subagent_max_iterations(),
            max_recursion_depth: default_max_recursion_depth(),
            escalation_threshold: default_escalation_threshold(),
            retry: RetryConfig::default(),
            tool_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per tool call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before attempt `n + 1` is `backoff_ms * n`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Records fetched from the memory pool per retrieval
    #[serde(default = "default_pool_limit")]
    pub pool_limit: usize,

    /// Facts injected into the prompt
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,

    /// Results scoring below this are dropped
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// How long a formatted context block is reused
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Most context blocks kept in the cache
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,

    /// Always take the rewriting path; the classifier is advisory only
    #[serde(default = "default_true")]
    pub smart_path_always: bool,

    /// Upper bound on query variants, original included, so a model
    /// rewrite contributes between 2 and `max_variants - 1` phrasings
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,

    /// Model used for query rewriting; falls back to the run's model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_model: Option<String>,

    /// Label attached to the injected block
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_pool_limit() -> usize {
    50
}
fn default_result_limit() -> usize {
    8
}
fn default_min_score() -> f32 {
    0.1
}
fn default_cache_ttl_secs() -> u64 {
    60
}
fn default_cache_max_entries() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_max_variants() -> usize {
    5
}
fn default_content_type() -> String {
    "memory_facts".into()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            pool_limit: default_pool_limit(),
            result_limit: default_result_limit(),
            min_score: default_min_score(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            smart_path_always: default_true(),
            max_variants: default_max_variants(),
            rewrite_model: None,
            content_type: default_content_type(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.skein/config.toml).
    ///
    /// Environment overrides, applied once here:
    /// - `SKEIN_MODEL`
    /// - `SKEIN_TEMPERATURE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("SKEIN_MODEL").filter(|m| !m.trim().is_empty()) {
            self.default_model = model;
        }

        if let Some(raw) = lookup("SKEIN_TEMPERATURE") {
            self.default_temperature = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("SKEIN_TEMPERATURE is not a number: {raw}"))
            })?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".skein")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 || self.agent.subagent_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "iteration budgets must be at least 1".into(),
            ));
        }

        if !(1..=MAX_RECURSION_DEPTH).contains(&self.agent.max_recursion_depth) {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_recursion_depth must be between 1 and {MAX_RECURSION_DEPTH}"
            )));
        }

        if self.agent.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.retry.max_attempts must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(ConfigError::ValidationError(
                "retrieval.min_score must be between 0.0 and 1.0".into(),
            ));
        }

        if !(3..=5).contains(&self.retrieval.max_variants) {
            return Err(ConfigError::ValidationError(
                "retrieval.max_variants must be between 3 and 5".into(),
            ));
        }

        if self.retrieval.cache_max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.cache_max_entries must be at least 1".into(),
            ));
        }

        if let Some(dup) = first_duplicate(self.subagents.iter().map(|s| s.name.as_str())) {
            return Err(ConfigError::ValidationError(format!(
                "subagent '{dup}' is defined more than once"
            )));
        }

        Ok(())
    }

    /// Build the subagent registry from the `[[subagents]]` tables.
    pub fn subagent_registry(&self) -> SubagentRegistry {
        self.subagents.iter().cloned().collect()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = std::collections::HashSet::new();
    names.into_iter().find(|n| !seen.insert(*n))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_temperature: default_temperature(),
            agent: AgentConfig::default(),
            retrieval: RetrievalConfig::default(),
            subagents: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
