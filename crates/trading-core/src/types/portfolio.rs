//! Point-in-time portfolio snapshot, the unit of persistence and reporting.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::OrderRecord;

/// How long a prior snapshot's daily start value stays authoritative.
pub fn daily_start_validity() -> Duration {
    Duration::minutes(6 * 60 + 30)
}

/// Full bookkeeping state at one instant.
///
/// Maps are ordered so that serialize, deserialize, serialize yields
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub time: DateTime<Utc>,
    pub daily_start_net_value: Decimal,
    pub current_net_value: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_percentage: Decimal,
    pub remain_portion: i32,
    /// symbol -> shares held
    pub positions: BTreeMap<String, Decimal>,
    pub cash_position: Decimal,
    /// symbol -> open lots, oldest first
    pub active_orders: BTreeMap<String, Vec<OrderRecord>>,
    /// symbol -> unrealized P&L of open lots
    pub active_pnl: BTreeMap<String, Decimal>,
    /// symbol -> unrealized P&L of open lots, percent of cost
    pub active_pnl_percentage: BTreeMap<String, Decimal>,
}

impl PortfolioSnapshot {
    /// Whether this snapshot's daily start value may be carried into a
    /// session starting at `now`.
    pub fn carries_daily_start(&self, now: DateTime<Utc>) -> bool {
        now - self.time < daily_start_validity()
    }

    /// Number of symbols with open lots.
    pub fn open_symbols(&self) -> usize {
        self.active_orders.values().filter(|o| !o.is_empty()).count()
    }
}

/// Daily P&L as a percentage of the tradable starting capital.
///
/// Returns zero when the starting capital is fully reserved.
pub fn daily_pnl_percentage(start: Decimal, current: Decimal, reserve: Decimal) -> Decimal {
    let base = start - reserve;
    if base.is_zero() {
        return Decimal::ZERO;
    }
    (current - start) / base * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> PortfolioSnapshot {
        let time = DateTime::parse_from_rfc3339("2024-03-04T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let order = OrderRecord {
            token: "9d7c9a5e-0000-4000-8000-000000000001".into(),
            symbol: "NVDA".into(),
            time,
            price: dec!(100.25),
            share: dec!(4.9875),
            remain_portion: 9,
        };
        PortfolioSnapshot {
            time,
            daily_start_net_value: dec!(10000),
            current_net_value: dec!(10050.50),
            daily_pnl: dec!(50.50),
            daily_pnl_percentage: dec!(0.505),
            remain_portion: 9,
            positions: BTreeMap::from([("NVDA".to_string(), dec!(4.9875))]),
            cash_position: dec!(9500),
            active_orders: BTreeMap::from([("NVDA".to_string(), vec![order])]),
            active_pnl: BTreeMap::from([("NVDA".to_string(), dec!(1.25))]),
            active_pnl_percentage: BTreeMap::from([("NVDA".to_string(), dec!(0.25))]),
        }
    }

    #[test]
    fn test_json_round_trip_is_byte_stable() {
        let snap = sample();
        let first = serde_json::to_string_pretty(&snap).unwrap();
        let parsed: PortfolioSnapshot = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&parsed).unwrap();

        assert_eq!(parsed, snap);
        assert_eq!(first, second);
    }

    #[test]
    fn test_daily_pnl_percentage() {
        assert_eq!(daily_pnl_percentage(dec!(1000), dec!(1100), dec!(0)), dec!(10));
        assert_eq!(daily_pnl_percentage(dec!(1000), dec!(1050), dec!(500)), dec!(10));
        assert_eq!(daily_pnl_percentage(dec!(500), dec!(600), dec!(500)), dec!(0));
    }

    #[test]
    fn test_daily_start_validity() {
        let snap = sample();
        assert!(snap.carries_daily_start(snap.time + Duration::hours(6)));
        assert!(!snap.carries_daily_start(snap.time + Duration::hours(7)));
        assert_eq!(snap.open_symbols(), 1);
    }
}
