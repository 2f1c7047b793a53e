//! Configuration structures.

use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use trading_agent::AgentConfig;
use trading_backtest::BacktestConfig;
use trading_core::clock::SessionHours;
use trading_core::traits::StrategyConfig;
use trading_data::{CollectorSettings, StoreSettings};
use trading_strategies::AlphaConfig;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub logging: LoggingConfig,
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub store: StoreSettings,
    pub collector: CollectorSettings,
    pub strategy: AlphaConfig,
    pub agent: AgentConfig,
    pub paths: PathSettings,
    pub backtest: BacktestSettings,
}

impl AppConfig {
    /// Exchange time zone.
    pub fn timezone(&self) -> Result<Tz, SettingsError> {
        self.app
            .timezone
            .parse()
            .map_err(|_| SettingsError::Invalid(format!("unknown time zone {}", self.app.timezone)))
    }

    /// Engine configuration for a backtest run; trades are sized by the
    /// `agent` section.
    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            initial_capital: self.backtest.initial_capital,
            lookback: self.backtest.lookback,
            snapshot_interval_minutes: self.backtest.snapshot_interval_minutes,
            liquidate_at_end: self.backtest.liquidate_at_end,
            agent: self.agent.clone(),
        }
    }

    /// Check values the types alone cannot rule out.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.timezone()?;
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(SettingsError::Invalid(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }
        if !self.session.hours.is_ordered() {
            return Err(SettingsError::Invalid(
                "session hours must be in chronological order".into(),
            ));
        }
        if self.session.decision_interval_secs == 0 || self.session.idle_sleep_secs == 0 {
            return Err(SettingsError::Invalid(
                "session intervals must be positive".into(),
            ));
        }
        if self.store.refresh_interval_secs == 0 || self.store.backfill_days < 0 {
            return Err(SettingsError::Invalid(
                "store.refresh_interval_secs must be positive and backfill_days not negative".into(),
            ));
        }
        if self.collector.sample_interval_secs == 0 || self.collector.flush_interval_secs == 0 {
            return Err(SettingsError::Invalid(
                "collector intervals must be positive".into(),
            ));
        }
        if self.broker.paper_cash <= Decimal::ZERO || self.backtest.initial_capital <= Decimal::ZERO {
            return Err(SettingsError::Invalid(
                "broker.paper_cash and backtest.initial_capital must be positive".into(),
            ));
        }
        if self.backtest.lookback == 0 {
            return Err(SettingsError::Invalid("backtest.lookback must be positive".into()));
        }
        self.strategy
            .validate()
            .map_err(|e| SettingsError::Invalid(format!("strategy: {e}")))?;
        self.agent
            .validate()
            .map_err(|e| SettingsError::Invalid(format!("agent: {e}")))?;
        Ok(())
    }
}

/// General app settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    /// IANA name of the exchange time zone
    pub timezone: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "intraday-trader".to_string(),
            timezone: "America/New_York".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    /// Directory for a daily rolling log file
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
            file_prefix: "intraday-trader.log".to_string(),
        }
    }
}

/// Brokerage settings. Alpaca credentials always come from the
/// `ALPACA_API_KEY` and `ALPACA_API_SECRET` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Market data feed, `iex` or `sip`
    pub feed: String,
    /// Starting cash of the paper brokerage
    pub paper_cash: Decimal,
    /// Adverse fill price move of the paper brokerage, in percent
    pub paper_slippage_pct: Decimal,
    /// Candles revealed before the first paper decision cycle
    pub replay_preload: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            feed: "iex".to_string(),
            paper_cash: dec!(100000),
            paper_slippage_pct: Decimal::ZERO,
            replay_preload: 120,
        }
    }
}

/// Process loop cadence and the trading calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub hours: SessionHours,
    /// Exchange holidays, in addition to weekends
    pub holidays: Vec<NaiveDate>,
    /// Seconds between decision cycles
    pub decision_interval_secs: u64,
    /// Seconds to sleep outside the trading day
    pub idle_sleep_secs: u64,
    /// Seconds between checks while waiting for pre-market
    pub preparing_poll_secs: u64,
    pub snapshot_interval_minutes: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            hours: SessionHours::default(),
            holidays: Vec::new(),
            decision_interval_secs: 60,
            idle_sleep_secs: 1800,
            preparing_poll_secs: 60,
            snapshot_interval_minutes: 60,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Comma-separated list of traded symbols
    pub symbols_file: PathBuf,
    pub snapshot_dir: PathBuf,
    pub orders_dir: PathBuf,
    pub collector_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            symbols_file: PathBuf::from("data/symbols.txt"),
            snapshot_dir: PathBuf::from("data/snapshots"),
            orders_dir: PathBuf::from("data/orders"),
            collector_dir: PathBuf::from("data/prices"),
        }
    }
}

/// Backtest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub initial_capital: Decimal,
    pub lookback: usize,
    pub snapshot_interval_minutes: i64,
    pub liquidate_at_end: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        let engine = BacktestConfig::default();
        Self {
            initial_capital: engine.initial_capital,
            lookback: engine.lookback,
            snapshot_interval_minutes: engine.snapshot_interval_minutes,
            liquidate_at_end: engine.liquidate_at_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::New_York);
        assert_eq!(config.backtest_config().agent, config.agent);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.app.timezone = "Mars/Olympus".into();
        assert!(matches!(config.validate(), Err(SettingsError::Invalid(_))));

        let mut config = AppConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.default_portions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.strategy.term_lines.clear();
        assert!(config.validate().is_err());
    }
}
