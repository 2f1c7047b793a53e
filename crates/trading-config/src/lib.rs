//! Configuration management.
//!
//! Settings are layered: built-in defaults, then the TOML file, then
//! `TRADING__SECTION__KEY` environment variables.

mod settings;

pub use settings::{
    AppConfig, AppSettings, BacktestSettings, BrokerSettings, LoggingConfig, PathSettings,
    SessionSettings, SettingsError,
};

use config::{Config, Environment, File, FileFormat};
use std::path::Path;

fn environment() -> Environment {
    Environment::with_prefix("TRADING")
        .separator("__")
        .try_parsing(true)
}

fn build(file: File<config::FileSourceFile, FileFormat>, env: Environment) -> Result<AppConfig, SettingsError> {
    let config = Config::builder().add_source(file).add_source(env).build()?;
    let app: AppConfig = config.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Load configuration from file and environment.
///
/// A missing file is an error; every key the file leaves out takes its
/// default.
pub fn load_config(path: &Path) -> Result<AppConfig, SettingsError> {
    build(File::from(path).required(true), environment())
}

/// Load configuration from the environment alone.
pub fn load_defaults() -> Result<AppConfig, SettingsError> {
    let config = Config::builder().add_source(environment()).build()?;
    let app: AppConfig = config.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use trading_agent::PortionSizing;

    fn write(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("settings.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
[agent]
default_portions = 6
min_cash_reserve = 2500

[agent.sizing]
method = "even_split"

[strategy]
golden_pit = 12.5
buy_blocklist = ["TSLA"]

[session]
holidays = ["2024-12-25"]

[session.hours]
preparing = "07:00:00"
pre_market_open = "07:30:00"
regular_open = "09:30:00"
regular_close = "16:00:00"
after_hours_close = "20:00:00"
"#,
        );

        let config = build(File::from(path.as_path()), env(&[])).unwrap();
        assert_eq!(config.agent.default_portions, 6);
        assert_eq!(config.agent.min_cash_reserve, dec!(2500));
        assert_eq!(config.agent.sizing, PortionSizing::EvenSplit);
        assert_eq!(config.strategy.golden_pit, 12.5);
        assert_eq!(config.strategy.buy_blocklist, vec!["TSLA".to_string()]);
        assert_eq!(config.session.holidays.len(), 1);
        // Untouched sections keep their defaults
        assert_eq!(config.store.refresh_interval_secs, 60);
        assert_eq!(config.paths.symbols_file, Path::new("data/symbols.txt"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "[agent]\ndefault_portions = 6\n");

        let config = build(
            File::from(path.as_path()),
            env(&[
                ("TRADING__AGENT__DEFAULT_PORTIONS", "4"),
                ("TRADING__LOGGING__FORMAT", "json"),
            ]),
        )
        .unwrap();
        assert_eq!(config.agent.default_portions, 4);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "[strategy]\ntake_profit_ratio = 0.9\n");
        assert!(matches!(
            build(File::from(path.as_path()), env(&[])),
            Err(SettingsError::Invalid(_))
        ));

        assert!(matches!(
            load_config(&dir.path().join("missing.toml")),
            Err(SettingsError::Load(_))
        ));
    }

    #[test]
    fn test_shipped_default_file_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config = build(File::from(path.as_path()), env(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
