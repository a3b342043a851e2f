//! Webhook delivery background job.
//!
//! Fans new integration events out to their webhooks and makes the first
//! delivery attempt.

use std::sync::Arc;

use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::WebhookDispatcher;

pub struct WebhookDeliveryJob {
    dispatcher: Arc<WebhookDispatcher>,
    frequency: JobFrequency,
    batch_size: i64,
}

impl WebhookDeliveryJob {
    pub fn new(dispatcher: Arc<WebhookDispatcher>, frequency: JobFrequency, batch_size: i64) -> Self {
        Self {
            dispatcher,
            frequency,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Job for WebhookDeliveryJob {
    fn name(&self) -> &'static str {
        "webhook_delivery"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency.clone()
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self.dispatcher.process_pending_events(self.batch_size).await;

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                delivered = summary.delivered,
                failed = summary.failed,
                retrying = summary.retrying,
                "Processed pending integration events"
            );
        }
        Ok(())
    }
}
