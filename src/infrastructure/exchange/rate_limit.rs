//! Tracks the exchange's rolling request-weight budget from the
//! `X-MBX-USED-WEIGHT-1M` response header and pauses the client before it
//! would otherwise trip the hard limit, rather than reacting only after a
//! 429 comes back.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::{sleep, Duration};
use tracing::warn;

/// Binance's own cap for a standard account, per minute.
pub const WEIGHT_LIMIT: i64 = 1200;
/// Pause proactively once used weight reaches this fraction of the cap.
pub const WEIGHT_PAUSE_THRESHOLD: i64 = 1100;

pub struct RateLimitGovernor {
    used_weight: AtomicI64,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitGovernor {
    pub fn new() -> Self {
        Self {
            used_weight: AtomicI64::new(0),
        }
    }

    /// Updates the tracked weight from the response header, if present.
    pub fn update(&self, used_weight_header: Option<&str>) {
        if let Some(value) = used_weight_header.and_then(|v| v.parse::<i64>().ok()) {
            self.used_weight.store(value, Ordering::Relaxed);
        }
    }

    /// Sleeps until the next minute boundary (plus a one-second margin) if
    /// the tracked weight is at or above the pause threshold, then resets
    /// the counter — mirroring the exchange's own per-minute window.
    pub async fn check(&self) {
        if self.used_weight.load(Ordering::Relaxed) < WEIGHT_PAUSE_THRESHOLD {
            return;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let seconds_into_minute = now % 60.0;
        let wait_secs = 60.0 - seconds_into_minute + 1.0;

        warn!(
            wait_secs,
            "rate limit governor pausing until next minute window"
        );
        sleep(Duration::from_secs_f64(wait_secs)).await;
        self.used_weight.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_is_a_noop_below_threshold() {
        let gov = RateLimitGovernor::new();
        gov.update(Some("500"));
        let start = std::time::Instant::now();
        gov.check().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn update_ignores_unparseable_header() {
        let gov = RateLimitGovernor::new();
        gov.update(Some("not-a-number"));
        assert_eq!(gov.used_weight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn update_stores_parsed_weight() {
        let gov = RateLimitGovernor::new();
        gov.update(Some("900"));
        assert_eq!(gov.used_weight.load(Ordering::Relaxed), 900);
    }
}
