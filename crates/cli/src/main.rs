//! Skein CLI: the developer entry point.
//!
//! Commands:
//! - `classify`: Show how a query would be classified and expanded
//! - `search`: Run the retrieval pipeline against a JSONL memory pool
//! - `config`: Show, locate, or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "skein",
    about = "Skein: agent orchestration with memory retrieval",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ~/.skein/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a query and list the variants retrieval would search with
    Classify {
        /// The query to analyze
        query: String,
    },

    /// Retrieve memories for a query from a JSONL pool file
    Search {
        /// Path to the pool file (one JSON record per line)
        #[arg(short, long)]
        pool: Option<PathBuf>,

        /// The query to retrieve for
        #[arg(short, long)]
        query: String,

        /// Owner of the memories
        #[arg(short, long, default_value = "default")]
        user: String,

        /// Print the system-prompt block instead of JSON
        #[arg(long)]
        prompt: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Classify { query } => commands::classify::run(config_path, &query).await?,
        Commands::Search {
            pool,
            query,
            user,
            prompt,
        } => commands::search::run(config_path, pool, &query, &user, prompt).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
