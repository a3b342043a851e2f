//! Background job scheduler and job implementations.

mod event_cleanup;
mod rate_limit_purge;
mod scheduler;
mod webhook_delivery;
mod webhook_retry;

use std::sync::Arc;
use std::time::Duration;

pub use event_cleanup::IntegrationEventCleanupJob;
pub use rate_limit_purge::RateLimitPurgeJob;
pub use scheduler::{Job, JobFrequency, JobRun, JobScheduler, JobStatus, RunNow};
pub use webhook_delivery::WebhookDeliveryJob;
pub use webhook_retry::WebhookRetryJob;

use persistence::DeliveryStore;

use crate::config::{parse_cron, Config};
use crate::middleware::RateLimiter;
use crate::services::{IntegrationEventService, WebhookDispatcher};

/// Registers every job. Whether they are started is up to the caller.
pub fn build_scheduler(
    config: &Config,
    dispatcher: Arc<WebhookDispatcher>,
    events: IntegrationEventService,
    deliveries: Arc<dyn DeliveryStore>,
    limiter: Arc<RateLimiter>,
) -> Result<JobScheduler, String> {
    let jobs = &config.jobs;
    let cron = |expression: &str| parse_cron(expression).map(|s| JobFrequency::Cron(Box::new(s)));

    let mut scheduler = JobScheduler::new();
    scheduler.register(WebhookDeliveryJob::new(
        Arc::clone(&dispatcher),
        cron(&jobs.delivery_schedule)?,
        jobs.delivery_batch_size,
    ));
    scheduler.register(WebhookRetryJob::new(
        dispatcher,
        cron(&jobs.retry_schedule)?,
        jobs.retry_batch_size,
    ));
    scheduler.register(IntegrationEventCleanupJob::new(
        events,
        deliveries,
        cron(&jobs.cleanup_schedule)?,
        jobs.event_retention_days,
    ));
    scheduler.register(RateLimitPurgeJob::new(
        limiter,
        JobFrequency::Every(Duration::from_secs(
            config.rate_limits.purge_interval_secs.max(1),
        )),
    ));

    Ok(scheduler)
}
