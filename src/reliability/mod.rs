//! Reliability layer.
//!
//! - [`RetransmitQueue`]: Pending Exchanges awaiting acknowledgment, with
//!   exponential backoff and a bounded retry budget
//! - [`DuplicateFilter`]: per-session windows of recently seen counters

mod dedup;
mod pending;

use std::time::Duration;

use crate::core::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_RETRY_INTERVAL, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_RETRY_INTERVAL,
};

pub use dedup::{DuplicateFilter, DuplicateWindow};
pub use pending::{PendingExchange, RetransmitQueue, RetryAction};

/// Retransmission schedule for messages sent with `require_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first retransmission.
    pub base_interval: Duration,
    /// Cap on any single wait.
    pub max_interval: Duration,
    /// Growth factor applied after every retransmission.
    pub backoff_multiplier: u32,
    /// Retransmissions before the message is reported undeliverable.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Wait following the `retries`-th retransmission (0 = after the first send).
    pub fn interval_after(&self, retries: u32) -> Duration {
        let mut interval = self.base_interval.min(self.max_interval);
        for _ in 0..retries {
            interval = interval
                .saturating_mul(self.backoff_multiplier)
                .min(self.max_interval);
        }
        interval
    }

    /// Time from the first send until the exchange is reported undeliverable.
    pub fn exchange_lifetime(&self) -> Duration {
        (0..=self.max_retries)
            .map(|n| self.interval_after(n))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_RETRY_INTERVAL,
            max_interval: DEFAULT_MAX_RETRY_INTERVAL,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}
