//! Validate configuration command.

use anyhow::Result;
use std::path::Path;
use trading_config::load_config;

pub async fn run(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {:?}", config_path);

    match load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("App: {}", config.app.name);
            println!("Time zone: {}", config.app.timezone);
            println!("Log level: {}", config.logging.level);
            println!("Data feed: {}", config.broker.feed);
            println!("Default portions: {}", config.agent.default_portions);
            println!("Sizing: {:?}", config.agent.sizing);
            println!("Min cash reserve: ${}", config.agent.min_cash_reserve);
            println!(
                "Term lines: {}",
                config
                    .strategy
                    .term_lines
                    .iter()
                    .map(|t| t.interval.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("Take profit: {}x", config.strategy.take_profit_ratio);
            println!("Stop loss: {}x", config.strategy.stop_loss_ratio);
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
