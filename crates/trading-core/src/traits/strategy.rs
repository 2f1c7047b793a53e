//! Strategy trait definitions.

use crate::error::StrategyError;
use crate::types::{ActionMetadata, Candle, IndicatorSpec, OrderRecord, SeriesSnapshot};

/// Configuration trait for strategies.
pub trait StrategyConfig: Send + Sync + Clone + 'static {
    /// Validate the configuration.
    fn validate(&self) -> Result<(), StrategyError>;
}

/// Read access to per-symbol candle history.
pub trait SeriesProvider: Send + Sync {
    /// Most recent candle of a symbol.
    fn latest(&self, symbol: &str) -> Option<Candle>;

    /// Candles of a symbol with the requested indicator columns, or `None`
    /// when the symbol has no data.
    fn series(&self, symbol: &str, specs: &[IndicatorSpec]) -> Option<SeriesSnapshot>;
}

/// A rule-based trading strategy.
///
/// `decide` is pure over a prepared snapshot; `action` wires it to a
/// [`SeriesProvider`].
pub trait TradingStrategy: Send + Sync {
    /// Get the unique name of this strategy.
    fn name(&self) -> &str;

    /// Indicator columns `decide` reads.
    fn indicator_specs(&self) -> &[IndicatorSpec];

    /// Whether a buy may be considered for this symbol at all.
    fn should_buy(&self, symbol: &str, latest: Option<&Candle>, open_orders: &[OrderRecord])
        -> bool;

    /// Whether a sell may be considered for this symbol at all.
    fn should_sell(&self, latest: Option<&Candle>, open_orders: &[OrderRecord]) -> bool;

    /// Evaluate the entry and exit rules on a prepared snapshot.
    fn decide(
        &self,
        snapshot: &SeriesSnapshot,
        open_orders: &[OrderRecord],
        should_buy: bool,
        should_sell: bool,
    ) -> ActionMetadata;

    /// Decide what to do with one symbol right now.
    fn action(
        &self,
        symbol: &str,
        provider: &dyn SeriesProvider,
        open_orders: &[OrderRecord],
    ) -> ActionMetadata {
        let latest = provider.latest(symbol);
        let should_buy = self.should_buy(symbol, latest.as_ref(), open_orders);
        let should_sell = self.should_sell(latest.as_ref(), open_orders);
        if !should_buy && !should_sell {
            return ActionMetadata::hold();
        }

        match provider.series(symbol, self.indicator_specs()) {
            Some(snapshot) if !snapshot.is_empty() => {
                self.decide(&snapshot, open_orders, should_buy, should_sell)
            }
            _ => ActionMetadata::hold(),
        }
    }
}
