//! Exchange-session clock.
//!
//! All predicates are pure functions of a UTC instant converted to the
//! exchange time zone. The `_at` forms take the instant explicitly; the short
//! forms read the injected [`Clock`], so tests can pin "now".

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Session boundaries in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHours {
    /// Start of the preparation window before pre-market
    pub preparing: NaiveTime,
    pub pre_market_open: NaiveTime,
    pub regular_open: NaiveTime,
    pub regular_close: NaiveTime,
    pub after_hours_close: NaiveTime,
}

impl Default for SessionHours {
    fn default() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
        Self {
            preparing: hm(7, 0),
            pre_market_open: hm(7, 30),
            regular_open: hm(9, 30),
            regular_close: hm(16, 0),
            after_hours_close: hm(20, 0),
        }
    }
}

impl SessionHours {
    /// Boundaries must be strictly increasing.
    pub fn is_ordered(&self) -> bool {
        self.preparing < self.pre_market_open
            && self.pre_market_open < self.regular_open
            && self.regular_open < self.regular_close
            && self.regular_close < self.after_hours_close
    }
}

/// Where in the trading day an instant falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    /// Weekend or holiday
    Closed,
    EarlyMorning,
    Preparing,
    PreMarket,
    Regular,
    AfterHours,
    LateNight,
}

impl MarketPhase {
    /// Phases in which the decision loop trades.
    pub fn is_tradable(&self) -> bool {
        matches!(
            self,
            MarketPhase::PreMarket | MarketPhase::Regular | MarketPhase::AfterHours
        )
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, MarketPhase::PreMarket | MarketPhase::AfterHours)
    }
}

/// Exchange calendar and session predicates.
#[derive(Clone)]
pub struct MarketClock {
    tz: Tz,
    hours: SessionHours,
    holidays: BTreeSet<NaiveDate>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MarketClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketClock")
            .field("tz", &self.tz)
            .field("hours", &self.hours)
            .field("holidays", &self.holidays.len())
            .finish()
    }
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            SessionHours::default(),
            Arc::new(SystemClock),
        )
    }
}

impl MarketClock {
    pub fn new(tz: Tz, hours: SessionHours, clock: Arc<dyn Clock>) -> Self {
        Self {
            tz,
            hours,
            holidays: BTreeSet::new(),
            clock,
        }
    }

    /// Add market holidays.
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn hours(&self) -> &SessionHours {
        &self.hours
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn local_time(&self, ts: DateTime<Utc>) -> NaiveTime {
        ts.with_timezone(&self.tz).time()
    }

    /// Exchange-local calendar date of an instant.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    pub fn is_early_morning_at(&self, ts: DateTime<Utc>) -> bool {
        self.local_time(ts) < self.hours.preparing
    }

    pub fn is_preparing_at(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        self.hours.preparing <= t && t < self.hours.pre_market_open
    }

    pub fn is_pre_market_at(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        self.hours.pre_market_open <= t && t < self.hours.regular_open
    }

    pub fn is_regular_hours_at(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        self.hours.regular_open <= t && t < self.hours.regular_close
    }

    pub fn is_after_hours_at(&self, ts: DateTime<Utc>) -> bool {
        let t = self.local_time(ts);
        self.hours.regular_close <= t && t < self.hours.after_hours_close
    }

    pub fn is_late_night_at(&self, ts: DateTime<Utc>) -> bool {
        self.local_time(ts) >= self.hours.after_hours_close
    }

    pub fn is_extended_hours_at(&self, ts: DateTime<Utc>) -> bool {
        self.is_pre_market_at(ts) || self.is_after_hours_at(ts)
    }

    /// Weekday that is not a configured holiday.
    pub fn is_trading_day_at(&self, ts: DateTime<Utc>) -> bool {
        let date = self.local_date(ts);
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    pub fn phase_at(&self, ts: DateTime<Utc>) -> MarketPhase {
        if !self.is_trading_day_at(ts) {
            MarketPhase::Closed
        } else if self.is_early_morning_at(ts) {
            MarketPhase::EarlyMorning
        } else if self.is_preparing_at(ts) {
            MarketPhase::Preparing
        } else if self.is_pre_market_at(ts) {
            MarketPhase::PreMarket
        } else if self.is_regular_hours_at(ts) {
            MarketPhase::Regular
        } else if self.is_after_hours_at(ts) {
            MarketPhase::AfterHours
        } else {
            MarketPhase::LateNight
        }
    }

    pub fn is_early_morning(&self) -> bool {
        self.is_early_morning_at(self.now())
    }

    pub fn is_preparing(&self) -> bool {
        self.is_preparing_at(self.now())
    }

    pub fn is_pre_market(&self) -> bool {
        self.is_pre_market_at(self.now())
    }

    pub fn is_regular_hours(&self) -> bool {
        self.is_regular_hours_at(self.now())
    }

    pub fn is_after_hours(&self) -> bool {
        self.is_after_hours_at(self.now())
    }

    pub fn is_late_night(&self) -> bool {
        self.is_late_night_at(self.now())
    }

    pub fn is_extended_hours(&self) -> bool {
        self.is_extended_hours_at(self.now())
    }

    pub fn is_trading_day(&self) -> bool {
        self.is_trading_day_at(self.now())
    }

    pub fn phase(&self) -> MarketPhase {
        self.phase_at(self.now())
    }

    /// Regular-session open and close of a local date, in UTC.
    pub fn regular_session(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let open = self
            .tz
            .from_local_datetime(&date.and_time(self.hours.regular_open))
            .earliest()?;
        let close = self
            .tz
            .from_local_datetime(&date.and_time(self.hours.regular_close))
            .earliest()?;
        Some((open.with_timezone(&Utc), close.with_timezone(&Utc)))
    }
}
