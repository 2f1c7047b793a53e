//! One decision cycle over every traded symbol.

use std::sync::Arc;
use tracing::{error, info, warn};
use trading_agent::{AgentError, TradingAgent};
use trading_core::types::{Action, OrderRecord};
use trading_core::TradingStrategy;
use trading_data::{HistoricalSeriesStore, OrderHistory, SnapshotStore};
use trading_monitor::log_snapshot;

/// Strategy, agent and persistence wired together for the live and paper
/// loops.
pub struct Trader {
    agent: TradingAgent,
    strategy: Box<dyn TradingStrategy>,
    store: Arc<HistoricalSeriesStore>,
    history: OrderHistory,
    snapshots: SnapshotStore,
}

impl Trader {
    pub fn new(
        agent: TradingAgent,
        strategy: Box<dyn TradingStrategy>,
        store: Arc<HistoricalSeriesStore>,
        history: OrderHistory,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            agent,
            strategy,
            store,
            history,
            snapshots,
        }
    }

    pub fn agent(&self) -> &TradingAgent {
        &self.agent
    }

    pub fn store(&self) -> &Arc<HistoricalSeriesStore> {
        &self.store
    }

    /// Ask the strategy about every symbol and execute what it decides.
    ///
    /// A failure on one symbol is logged and the cycle moves on. Returns the
    /// fills booked.
    pub async fn cycle(&mut self, extended_hours: bool) -> Vec<OrderRecord> {
        let symbols = self.agent.ledger().symbols().to_vec();
        let mut booked = Vec::new();

        for symbol in &symbols {
            let decision = self.strategy.action(
                symbol,
                self.store.as_ref(),
                self.agent.open_orders(symbol),
            );
            let result = match decision.action {
                Action::Hold => continue,
                Action::Buy => self.agent.buy(symbol, &decision.token, extended_hours).await,
                Action::Sell => {
                    let liquidation = self.agent.config().liquidation;
                    self.agent
                        .clean_positions(symbol, &decision.token, extended_hours, liquidation)
                        .await
                }
            };

            match result {
                Ok(Some(record)) => {
                    if let Err(e) = self.history.append(&record) {
                        error!(symbol = %symbol, error = %e, "Failed to write order history");
                    }
                    booked.push(record);
                }
                Ok(None) => {}
                Err(e @ AgentError::InsufficientFunds { .. }) => {
                    warn!(symbol = %symbol, error = %e, "Skipping buy");
                }
                Err(e) => {
                    error!(symbol = %symbol, action = %decision.action, error = %e, "Trade failed");
                }
            }
        }

        booked
    }

    /// Snapshot the portfolio, write it to disk and log it.
    pub async fn persist_snapshot(&self) {
        let snapshot = match self.agent.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Failed to take portfolio snapshot");
                return;
            }
        };
        match self.snapshots.save(&snapshot) {
            Ok(path) => info!(path = %path.display(), "Saved portfolio snapshot"),
            Err(e) => error!(error = %e, "Failed to save portfolio snapshot"),
        }
        log_snapshot(&snapshot);
    }
}
