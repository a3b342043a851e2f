//! Webhook retry background job.

use std::sync::Arc;

use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::WebhookDispatcher;

/// Re-attempts deliveries whose backoff has elapsed.
pub struct WebhookRetryJob {
    dispatcher: Arc<WebhookDispatcher>,
    frequency: JobFrequency,
    batch_size: i64,
}

impl WebhookRetryJob {
    pub fn new(dispatcher: Arc<WebhookDispatcher>, frequency: JobFrequency, batch_size: i64) -> Self {
        Self {
            dispatcher,
            frequency,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Job for WebhookRetryJob {
    fn name(&self) -> &'static str {
        "webhook_retry"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency.clone()
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self.dispatcher.process_retry_events(self.batch_size).await;

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                delivered = summary.delivered,
                failed = summary.failed,
                retrying = summary.retrying,
                batch_size = self.batch_size,
                "Processed webhook retries"
            );
        }
        Ok(())
    }
}
