//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "intraday-trader")]
#[command(author, version, about = "Intraday equity trader driven by term-line and main-force signals")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level, overrides the configuration file
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Enable JSON log format
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Trade through Alpaca, sleeping outside market hours
    Live(LiveArgs),
    /// Replay CSV candles through the in-memory paper brokerage
    Paper(PaperArgs),
    /// Run the strategy over historical candles
    Backtest(BacktestArgs),
    /// Record latest prices to disk while the market is open
    Collect(CollectArgs),
    /// Print the latest persisted portfolio snapshot
    Status(StatusArgs),
    /// Validate configuration
    ValidateConfig,
}

#[derive(clap::Args)]
pub struct LiveArgs {
    /// Symbols to trade (comma-separated), instead of the symbols file
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

#[derive(clap::Args)]
pub struct PaperArgs {
    /// CSV file or directory of per-symbol CSV files
    #[arg(short, long)]
    pub data: PathBuf,

    /// Symbols to trade (comma-separated), defaults to every symbol in the data
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Starting cash, overrides broker.paper_cash
    #[arg(long)]
    pub cash: Option<Decimal>,

    /// Milliseconds to pause between replayed candles
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
pub struct BacktestArgs {
    /// CSV file or directory of per-symbol CSV files
    #[arg(short, long, conflicts_with = "fetch")]
    pub data: Option<PathBuf>,

    /// Fetch the seed window from Alpaca instead of reading CSV
    #[arg(long)]
    pub fetch: bool,

    /// Symbols to test (comma-separated), defaults to every symbol in the data
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Starting cash, overrides backtest.initial_capital
    #[arg(long)]
    pub capital: Option<Decimal>,

    /// Continue from the latest backtest snapshot
    #[arg(long)]
    pub resume: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Save the JSON report to a file
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Save the equity curve as CSV
    #[arg(long)]
    pub equity_csv: Option<PathBuf>,

    /// Write the replay's snapshots to the backtest snapshot directory
    #[arg(long)]
    pub persist: bool,
}

#[derive(clap::Args)]
pub struct CollectArgs {
    /// Symbols to record (comma-separated), instead of the symbols file
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Print the snapshot as JSON
    #[arg(long)]
    pub json: bool,

    /// Read the paper or backtest snapshots instead of the live ones
    #[arg(long, value_enum)]
    pub mode: Option<StatusMode>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusMode {
    Paper,
    Backtest,
}

impl StatusMode {
    pub fn dir_name(&self) -> &'static str {
        match self {
            StatusMode::Paper => "paper",
            StatusMode::Backtest => "backtest",
        }
    }
}
