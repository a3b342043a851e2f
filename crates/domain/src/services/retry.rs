//! Exponential backoff for failed webhook deliveries.

use chrono::{DateTime, Duration, Utc};

/// Retry policy for webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::seconds(60),
            multiplier: 2,
            max_delay: Duration::seconds(3600),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt_at: DateTime<Utc> },
    GiveUp,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based):
    /// `min(initial * multiplier^(attempt - 1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = i64::from(self.multiplier).checked_pow(exponent);
        let delay_secs = factor
            .and_then(|f| self.initial_delay.num_seconds().checked_mul(f))
            .unwrap_or(i64::MAX);
        Duration::seconds(delay_secs.min(self.max_delay.num_seconds()))
    }

    /// Decides whether failed attempt `attempt` gets another try.
    pub fn decide(&self, attempt: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            next_attempt_at: failed_at + self.delay_for(attempt),
        }
    }
}
