//! Per-client fixed-window rate limiting.
//!
//! One window per client id. A window older than the configured duration is
//! replaced, never extended. Requests past the tier limit still count, so a
//! client hammering through a 429 stays limited until the window ends.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window ends, at least 1. Only meaningful when denied.
    pub retry_after_secs: u64,
}

/// Rate limiter state shared across all requests.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<Uuid, Window>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    pub fn check(&self, client_id: Uuid, limit: u32) -> RateDecision {
        self.check_at(client_id, limit, Utc::now())
    }

    /// Counts one request at `now`. The entry stays locked for the whole
    /// read-modify-write, so concurrent requests never lose increments.
    pub fn check_at(&self, client_id: Uuid, limit: u32, now: DateTime<Utc>) -> RateDecision {
        let mut entry = self.windows.entry(client_id).or_insert(Window {
            started: now,
            count: 0,
        });

        if now - entry.started >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        entry.count = entry.count.saturating_add(1);
        let reset_at = entry.started + self.window;
        let allowed = entry.count <= limit;

        let millis_left = (reset_at - now).num_milliseconds().max(0) as u64;
        RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at,
            retry_after_secs: millis_left.div_ceil(1000).max(1),
        }
    }

    /// Drops windows that ended before `now`. Returns how many were removed.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now - window.started < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::seconds(60))
    }

    #[test]
    fn test_first_request_opens_window() {
        let limiter = limiter();
        let now = Utc::now();
        let decision = limiter.check_at(Uuid::new_v4(), 5, now);

        assert!(decision.allowed);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_at, now + Duration::seconds(60));
    }

    #[test]
    fn test_limit_plus_one_is_denied() {
        let limiter = limiter();
        let client = Uuid::new_v4();
        let start = Utc::now();

        for i in 0..5 {
            let decision = limiter.check_at(client, 5, start + Duration::seconds(i));
            assert!(decision.allowed, "request {} should be allowed", i + 1);
        }

        let denied = limiter.check_at(client, 5, start + Duration::seconds(10));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs, 50);
    }

    #[test]
    fn test_fresh_window_after_expiry() {
        let limiter = limiter();
        let client = Uuid::new_v4();
        let start = Utc::now();

        for _ in 0..6 {
            limiter.check_at(client, 5, start);
        }

        let later = start + Duration::seconds(60);
        let decision = limiter.check_at(client, 5, later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_at, later + Duration::seconds(60));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter();
        let client = Uuid::new_v4();
        let start = Utc::now();
        limiter.check_at(client, 1, start);

        let denied = limiter.check_at(client, 1, start + Duration::milliseconds(59_500));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 1);
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = limiter();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        assert!(limiter.check_at(a, 1, now).allowed);
        assert!(!limiter.check_at(a, 1, now).allowed);
        assert!(limiter.check_at(b, 1, now).allowed);
    }

    #[test]
    fn test_purge_idle_windows() {
        let limiter = limiter();
        let now = Utc::now();
        limiter.check_at(Uuid::new_v4(), 10, now - Duration::seconds(120));
        limiter.check_at(Uuid::new_v4(), 10, now - Duration::seconds(10));

        assert_eq!(limiter.purge_idle(now), 1);
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.is_empty());
    }

    #[test]
    fn test_concurrent_checks_never_lose_counts() {
        let limiter = Arc::new(limiter());
        let client = Uuid::new_v4();
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.check_at(client, 500, now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 500);
    }
}
