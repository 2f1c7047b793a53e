//! Portfolio snapshot reporting.

use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::info;
use trading_core::types::PortfolioSnapshot;

/// Emit one structured log line per snapshot plus one per open symbol.
pub fn log_snapshot(snapshot: &PortfolioSnapshot) {
    info!(
        net_value = %snapshot.current_net_value,
        daily_pnl = %snapshot.daily_pnl,
        daily_pnl_pct = %snapshot.daily_pnl_percentage.round_dp(2),
        cash = %snapshot.cash_position,
        remain_portion = snapshot.remain_portion,
        open_symbols = snapshot.open_symbols(),
        "Portfolio snapshot"
    );
    for (symbol, orders) in snapshot.active_orders.iter().filter(|(_, o)| !o.is_empty()) {
        info!(
            symbol = %symbol,
            lots = orders.len(),
            shares = %snapshot.positions.get(symbol).copied().unwrap_or_default(),
            pnl = %snapshot.active_pnl.get(symbol).copied().unwrap_or_default().round_dp(2),
            "Open position"
        );
    }
}

/// Plain-text report of a snapshot with times in `tz`.
pub fn render_snapshot(snapshot: &PortfolioSnapshot, tz: Tz) -> String {
    let mut s = String::new();

    s.push_str("═══════════════════════════════════════════════════════════\n");
    s.push_str(&format!(
        "  PORTFOLIO  {}\n",
        snapshot.time.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
    ));
    s.push_str("═══════════════════════════════════════════════════════════\n");
    s.push_str(&format!("  Net Value:           ${:.2}\n", snapshot.current_net_value));
    s.push_str(&format!("  Start of Day:        ${:.2}\n", snapshot.daily_start_net_value));
    s.push_str(&format!(
        "  Daily P&L:           ${:.2} ({:.2}%)\n",
        snapshot.daily_pnl, snapshot.daily_pnl_percentage
    ));
    s.push_str(&format!("  Cash:                ${:.2}\n", snapshot.cash_position));
    s.push_str(&format!("  Portions Left:       {}\n", snapshot.remain_portion));
    s.push('\n');

    let held: Vec<_> = snapshot
        .positions
        .iter()
        .filter(|(_, shares)| **shares != Decimal::ZERO)
        .collect();
    if held.is_empty() {
        s.push_str("  No open positions\n");
    } else {
        s.push_str("  SYMBOL      SHARES     LOTS        P&L      P&L%\n");
        s.push_str("───────────────────────────────────────────────────────────\n");
        for (symbol, shares) in held {
            let lots = snapshot.active_orders.get(symbol).map(Vec::len).unwrap_or(0);
            let pnl = snapshot.active_pnl.get(symbol).copied().unwrap_or_default();
            let pct = snapshot
                .active_pnl_percentage
                .get(symbol)
                .copied()
                .unwrap_or_default();
            s.push_str(&format!(
                "  {:<8} {:>9.4} {:>8} {:>10.2} {:>8.2}%\n",
                symbol, shares, lots, pnl, pct
            ));
        }
    }
    s.push_str("═══════════════════════════════════════════════════════════\n");

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use trading_core::types::OrderRecord;

    fn snapshot() -> PortfolioSnapshot {
        let time = DateTime::parse_from_rfc3339("2024-03-04T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let lot = OrderRecord {
            token: "c1".into(),
            symbol: "NVDA".into(),
            time,
            price: dec!(500),
            share: dec!(2),
            remain_portion: 9,
        };
        PortfolioSnapshot {
            time,
            daily_start_net_value: dec!(10000),
            current_net_value: dec!(10100),
            daily_pnl: dec!(100),
            daily_pnl_percentage: dec!(1),
            remain_portion: 9,
            positions: BTreeMap::from([("AAPL".into(), Decimal::ZERO), ("NVDA".into(), dec!(2))]),
            cash_position: dec!(9000),
            active_orders: BTreeMap::from([("AAPL".into(), vec![]), ("NVDA".into(), vec![lot])]),
            active_pnl: BTreeMap::from([("NVDA".into(), dec!(100))]),
            active_pnl_percentage: BTreeMap::from([("NVDA".into(), dec!(10))]),
        }
    }

    #[test]
    fn test_render_snapshot() {
        let text = render_snapshot(&snapshot(), chrono_tz::America::New_York);

        assert!(text.contains("2024-03-04 10:00:00 EST"));
        assert!(text.contains("$10100.00"));
        assert!(text.contains("$100.00 (1.00%)"));
        assert!(text.contains("NVDA"));
        assert!(!text.contains("AAPL"));
    }

    #[test]
    fn test_render_flat_portfolio() {
        let mut snap = snapshot();
        snap.positions.insert("NVDA".into(), Decimal::ZERO);
        assert!(render_snapshot(&snap, chrono_tz::UTC).contains("No open positions"));
    }
}
