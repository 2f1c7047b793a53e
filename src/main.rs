//! Intraday trader CLI application.

mod cli;
mod shutdown;
mod trader;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use trading_config::{load_config, load_defaults, AppConfig};
use trading_monitor::{setup_logging, LoggingOptions};

/// The configuration file when it exists, otherwise defaults plus the
/// environment.
fn load(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config(path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        load_defaults().context("Failed to load default configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ValidateConfig = cli.command {
        return cli::commands::validate::run(&cli.config).await;
    }

    let config = load(&cli.config)?;

    // Setup logging; the guard flushes the log file on drop
    let options = LoggingOptions {
        level: cli
            .log_level
            .map(|l| l.as_str().to_string())
            .unwrap_or_else(|| config.logging.level.clone()),
        json: cli.json_logs || config.logging.format == "json",
        directory: config.logging.directory.clone(),
        file_prefix: config.logging.file_prefix.clone(),
    };
    let _guard = setup_logging(&options).context("Failed to set up logging")?;

    // Execute command
    match cli.command {
        Commands::Live(args) => cli::commands::live::run(args, &config).await,
        Commands::Paper(args) => cli::commands::paper::run(args, &config).await,
        Commands::Backtest(args) => cli::commands::backtest::run(args, &config).await,
        Commands::Collect(args) => cli::commands::collect::run(args, &config).await,
        Commands::Status(args) => cli::commands::status::run(args, &config).await,
        Commands::ValidateConfig => cli::commands::validate::run(&cli.config).await,
    }
}
