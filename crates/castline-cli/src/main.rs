// Castline CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Configuration is a TOML file plus environment overrides; secrets only come from the environment.
// Design Decision: Ctrl-C stops new generation calls; whatever finished stays cached for the next run.

mod commands;
mod config;
mod output;
mod provider;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::clean_cache::CleanCacheArgs;
use crate::commands::run::RunArgs;
use crate::config::AppConfig;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "castline")]
#[command(about = "Castline - Build CS2 match commentary timelines from analysis outputs")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(long, short, global = true, env = "CASTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate narration and schedule it into per-half timelines
    Run(RunArgs),

    /// Strip leaked labels from cached narration and compact the cache files
    CleanCache(CleanCacheArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castline=info,castline_core=info,castline_openai=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            config.apply_env()?;
            commands::run::run(args, config, cli.format).await
        }
        Commands::CleanCache(args) => commands::clean_cache::run(args, cli.format).await,
    }
}
