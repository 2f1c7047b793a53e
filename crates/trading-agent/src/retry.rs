//! Bounded polling used to confirm fills.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use trading_core::error::BrokerError;

/// How many times to check and how long to wait between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Buy confirmation: 25 checks one second apart.
    pub fn buy_fill() -> Self {
        Self::new(25, Duration::from_secs(1))
    }

    /// Sell confirmation: 30 checks half a second apart.
    pub fn sell_fill() -> Self {
        Self::new(30, Duration::from_millis(500))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Longest time a poll can wait in total.
    pub fn timeout(&self) -> Duration {
        self.interval() * self.max_attempts.saturating_sub(1)
    }
}

/// Call `check` until it yields a value or the attempts run out.
///
/// Returns `Ok(None)` on timeout. Transient broker errors count as a failed
/// attempt; any other error ends the poll.
pub async fn poll_until<T, F, Fut>(policy: &RetryPolicy, mut check: F) -> Result<Option<T>, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, BrokerError>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                warn!(attempt, error = %e, "Check failed, retrying");
            }
            Err(e) => return Err(e),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = poll_until(&policy, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((n == 3).then_some(n))
        })
        .await
        .unwrap();

        assert_eq!(result, Some(3));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::buy_fill();

        let result: Option<()> = poll_until(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Connection("reset".into()))
        })
        .await
        .unwrap();

        assert!(result.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 25);
        assert_eq!(policy.timeout(), Duration::from_secs(24));
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_permanent_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<Option<()>, _> = poll_until(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::OrderRejected("halted".into()))
        })
        .await;

        assert!(matches!(result, Err(BrokerError::OrderRejected(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
