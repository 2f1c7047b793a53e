//! Market data source trait definitions.

use crate::error::{BrokerError, DataError};
use crate::types::{Candle, HistorySpan, SessionBounds, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Trait for historical candle sources.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch recent candles for several symbols.
    ///
    /// # Arguments
    /// * `symbols` - Symbols to fetch
    /// * `interval` - Candle interval
    /// * `span` - How far back to reach from now
    /// * `bounds` - Regular session only, or including extended hours
    ///
    /// # Returns
    /// Candles per symbol ordered from oldest to newest. Symbols without data
    /// may be missing from the map. Returned candles carry no id.
    async fn candles(
        &self,
        symbols: &[String],
        interval: Timeframe,
        span: HistorySpan,
        bounds: SessionBounds,
    ) -> Result<HashMap<String, Vec<Candle>>, DataError>;

    /// Re-establish the session after a failed fetch.
    async fn reconnect(&self) -> Result<(), DataError>;

    /// Get the data source name.
    fn source_name(&self) -> &str;
}

/// Trait for latest-price lookups.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest trade price for a symbol.
    ///
    /// With `extended_hours` the price may come from pre-market or after-hours
    /// trading.
    async fn latest_price(&self, symbol: &str, extended_hours: bool)
        -> Result<Decimal, BrokerError>;

    /// Latest prices for several symbols. Symbols without a price are skipped.
    async fn latest_prices(
        &self,
        symbols: &[String],
        extended_hours: bool,
    ) -> Result<HashMap<String, Decimal>, BrokerError> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.latest_price(symbol, extended_hours).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                }
                Err(BrokerError::PriceUnavailable(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(prices)
    }

    /// Re-establish the session after a failed lookup.
    async fn reconnect_quotes(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
