//! Simulated clock: scales simulated minutes and hours to real durations.
//!
//! Only timed activities (climbing, racing, travelling) sleep through the
//! clock. Correctness never depends on it.

use std::time::Duration;

use crate::config::ClockConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    minute: Duration,
}

impl SimClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            minute: Duration::from_millis(config.minute_ms),
        }
    }

    pub fn minutes(&self, n: u64) -> Duration {
        self.minute.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub fn hours(&self, n: u64) -> Duration {
        self.minutes(n.saturating_mul(60))
    }

    /// Sleep for `n` simulated minutes.
    pub async fn sleep_minutes(&self, n: u64) {
        tokio::time::sleep(self.minutes(n)).await;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}
