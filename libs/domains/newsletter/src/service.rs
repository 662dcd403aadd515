use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::DispatchConfig;
use crate::context::DispatchContext;
use crate::error::NewsletterResult;
use crate::generator::{GenerationOutcome, QueueGenerator};
use crate::sender::{DrainReport, QueueSender};

/// Trigger surface of the dispatch pipeline.
pub struct NewsletterService {
    generator: QueueGenerator,
    sender: Arc<QueueSender>,
}

impl NewsletterService {
    pub fn new(ctx: DispatchContext, config: DispatchConfig) -> Self {
        Self {
            generator: QueueGenerator::new(ctx.clone(), config.clone()),
            sender: Arc::new(QueueSender::new(ctx, config)),
        }
    }

    pub async fn generate_queue(&self, campaign_id: i64) -> NewsletterResult<GenerationOutcome> {
        self.generator.generate(campaign_id).await
    }

    pub async fn generate_queue_for_subscriber(
        &self,
        campaign_id: i64,
        subscriber_id: i64,
    ) -> NewsletterResult<u64> {
        self.generator
            .generate_for_subscriber(campaign_id, subscriber_id)
            .await
    }

    /// Start a background drain. `None` means one is already running.
    pub fn start_drain(
        &self,
        send_failed: bool,
        campaign_id: Option<i64>,
    ) -> Option<JoinHandle<DrainReport>> {
        self.sender.start_drain(send_failed, campaign_id)
    }

    /// Drain on the calling task. `None` means one is already running.
    pub async fn drain(&self, send_failed: bool, campaign_id: Option<i64>) -> Option<DrainReport> {
        self.sender.drain(send_failed, campaign_id).await
    }

    pub fn notify_setting_changed(&self) {
        self.sender.notify_setting_changed();
    }

    pub fn is_draining(&self) -> bool {
        self.sender.is_draining()
    }
}
