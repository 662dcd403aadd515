use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::NewsletterResult;

/// Background task that picks the winning variant of an A/B test.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WinnerSelectionScheduler: Send + Sync {
    /// (Re)schedule selection once every variant has finished.
    async fn schedule(&self, parent_campaign_id: i64) -> NewsletterResult<()>;

    /// Re-enable a selection task that was paused by an interrupted send.
    async fn enable(&self, parent_campaign_id: i64) -> NewsletterResult<()>;
}

/// Scheduler that only remembers what it was asked to do.
#[derive(Debug, Default, Clone)]
pub struct RecordingWinnerScheduler {
    scheduled: Arc<Mutex<Vec<i64>>>,
    enabled: Arc<Mutex<Vec<i64>>>,
}

impl RecordingWinnerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn scheduled(&self) -> Vec<i64> {
        self.scheduled.lock().await.clone()
    }

    pub async fn enabled(&self) -> Vec<i64> {
        self.enabled.lock().await.clone()
    }
}

#[async_trait]
impl WinnerSelectionScheduler for RecordingWinnerScheduler {
    async fn schedule(&self, parent_campaign_id: i64) -> NewsletterResult<()> {
        self.scheduled.lock().await.push(parent_campaign_id);
        Ok(())
    }

    async fn enable(&self, parent_campaign_id: i64) -> NewsletterResult<()> {
        self.enabled.lock().await.push(parent_campaign_id);
        Ok(())
    }
}
