//! Drops idle rate-limit windows.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::middleware::RateLimiter;

pub struct RateLimitPurgeJob {
    limiter: Arc<RateLimiter>,
    frequency: JobFrequency,
}

impl RateLimitPurgeJob {
    pub fn new(limiter: Arc<RateLimiter>, frequency: JobFrequency) -> Self {
        Self { limiter, frequency }
    }
}

#[async_trait::async_trait]
impl Job for RateLimitPurgeJob {
    fn name(&self) -> &'static str {
        "rate_limit_purge"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency.clone()
    }

    async fn execute(&self) -> Result<(), String> {
        let removed = self.limiter.purge_idle(Utc::now());
        debug!(removed = removed, tracked = self.limiter.len(), "Rate-limit windows purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_purges_expired_windows() {
        let limiter = Arc::new(RateLimiter::new(chrono::Duration::seconds(60)));
        limiter.check_at(Uuid::new_v4(), 10, Utc::now() - chrono::Duration::seconds(300));
        limiter.check(Uuid::new_v4(), 10);

        let job = RateLimitPurgeJob::new(
            Arc::clone(&limiter),
            JobFrequency::Every(Duration::from_secs(300)),
        );
        job.execute().await.unwrap();
        assert_eq!(limiter.len(), 1);
    }
}
