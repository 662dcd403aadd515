//! The queue drain loop.
//!
//! At most one drain runs per `QueueSender`: a second trigger while one is
//! active returns immediately without touching the queue. The single permit
//! is held for the whole run and released on every exit path.

mod drain;
mod report;

pub use report::{DrainOutcome, DrainReport};

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::context::DispatchContext;
use crate::error::{NewsletterError, NewsletterResult};
use crate::models::{Campaign, CampaignStatus};

pub struct QueueSender {
    ctx: DispatchContext,
    config: DispatchConfig,
    permit: Arc<Semaphore>,
    settings_changed: watch::Sender<u64>,
}

impl QueueSender {
    pub fn new(ctx: DispatchContext, config: DispatchConfig) -> Self {
        let (settings_changed, _) = watch::channel(0);
        Self {
            ctx,
            config,
            permit: Arc::new(Semaphore::new(1)),
            settings_changed,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Signal a running drain that the site switches changed. The drain
    /// re-checks them before every batch either way.
    pub fn notify_setting_changed(&self) {
        self.settings_changed.send_modify(|generation| *generation = generation.wrapping_add(1));
        debug!("Sending settings changed");
    }

    /// Run a drain on a background task.
    ///
    /// Returns `None` when a drain is already running.
    pub fn start_drain(
        self: &Arc<Self>,
        send_failed: bool,
        campaign_id: Option<i64>,
    ) -> Option<JoinHandle<DrainReport>> {
        let permit = self.try_acquire()?;
        let sender = Arc::clone(self);
        Some(tokio::spawn(async move {
            sender.run(permit, send_failed, campaign_id).await
        }))
    }

    /// Run a drain on the current task.
    ///
    /// Returns `None` when a drain is already running.
    pub async fn drain(&self, send_failed: bool, campaign_id: Option<i64>) -> Option<DrainReport> {
        let permit = self.try_acquire()?;
        Some(self.run(permit, send_failed, campaign_id).await)
    }

    fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.permit).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                debug!("Drain already running, ignoring trigger");
                None
            }
        }
    }

    async fn run(
        &self,
        _permit: OwnedSemaphorePermit,
        send_failed: bool,
        campaign_id: Option<i64>,
    ) -> DrainReport {
        let mut report = DrainReport::new(campaign_id);
        match self.execute(&mut report, send_failed, campaign_id).await {
            Ok(outcome) => {
                report.outcome = outcome;
                info!(
                    campaign_id = ?report.campaign_id,
                    sent = report.sent,
                    failed = report.failed,
                    outcome = %report.outcome,
                    "Drain finished"
                );
            }
            Err(err) => {
                error!(
                    campaign_id = ?report.campaign_id,
                    sent = report.sent,
                    error = %err,
                    "Drain aborted"
                );
                report.outcome = DrainOutcome::Failed(err.to_string());
            }
        }
        report
    }

    async fn execute(
        &self,
        report: &mut DrainReport,
        send_failed: bool,
        campaign_id: Option<i64>,
    ) -> NewsletterResult<DrainOutcome> {
        let mut changes = self.settings_changed.subscribe();

        if send_failed {
            self.prepare_retry().await?;
        }

        let target = match campaign_id {
            Some(id) => self.explicit_target(id).await?,
            None => self.next_due_campaign(send_failed).await?,
        };
        let Some(target) = target else {
            debug!("No campaign to send");
            return Ok(DrainOutcome::NothingToSend);
        };
        report.campaign_id = Some(target.id);

        if !self.ctx.sending_enabled(target.site_id) {
            warn!(
                campaign_id = target.id,
                site_id = target.site_id,
                "Sending is disabled for the site"
            );
            return Ok(DrainOutcome::Disabled);
        }

        info!(campaign_id = target.id, send_failed, "Starting drain");
        match target.parent_id {
            Some(parent_id) => {
                self.drain_variant(report, &target, parent_id, send_failed, &mut changes)
                    .await
            }
            None => self.drain_plain(report, &target, send_failed, &mut changes).await,
        }
    }

    /// Release rows claimed by an interrupted drain and re-arm winner
    /// selection for A/B tests that already started sending.
    async fn prepare_retry(&self) -> NewsletterResult<()> {
        let released = self.ctx.queue.reset_sending(None).await?;
        if released > 0 {
            info!(released, "Released rows claimed by an interrupted drain");
        }

        for test in self.ctx.campaigns.unresolved_ab_tests().await? {
            let variants = self.ctx.campaigns.variants(test.parent_campaign_id).await?;
            let started = variants.iter().any(|v| {
                v.sent_count > 0
                    || matches!(v.status, CampaignStatus::Sending | CampaignStatus::Finished)
            });
            if started {
                self.ctx.winner.enable(test.parent_campaign_id).await?;
            }
        }
        Ok(())
    }

    async fn explicit_target(&self, campaign_id: i64) -> NewsletterResult<Option<Campaign>> {
        let campaign = self
            .ctx
            .campaigns
            .campaign(campaign_id)
            .await?
            .ok_or(NewsletterError::CampaignNotFound(campaign_id))?;
        if campaign.is_variant() {
            return Ok(Some(campaign));
        }
        self.through_winner(campaign).await
    }

    /// A/B parents are sent as their winning variant; an undecided test has
    /// nothing to send at the parent level.
    async fn through_winner(&self, campaign: Campaign) -> NewsletterResult<Option<Campaign>> {
        let Some(test) = self.ctx.campaigns.ab_test(campaign.id).await? else {
            return Ok(Some(campaign));
        };
        match test.winner_campaign_id {
            Some(winner_id) => self.ctx.campaigns.campaign(winner_id).await,
            None => {
                warn!(
                    campaign_id = campaign.id,
                    "A/B test still running, send the variants instead"
                );
                Ok(None)
            }
        }
    }

    /// Oldest due non-variant campaign with claimable rows.
    ///
    /// Parents of every unresolved A/B test are left out, not only the
    /// parent being considered.
    async fn next_due_campaign(&self, send_failed: bool) -> NewsletterResult<Option<Campaign>> {
        let pending = self.ctx.queue.pending_campaigns(send_failed).await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let testing: HashSet<i64> = self
            .ctx
            .campaigns
            .unresolved_ab_tests()
            .await?
            .into_iter()
            .map(|t| t.parent_campaign_id)
            .collect();

        let now = Utc::now();
        let picked = self
            .ctx
            .campaigns
            .campaigns(&pending)
            .await?
            .into_iter()
            .filter(|c| !c.is_variant() && c.is_due(now) && !testing.contains(&c.id))
            .min_by_key(|c| (c.mailout_time, c.id));

        match picked {
            Some(campaign) => self.through_winner(campaign).await,
            None => Ok(None),
        }
    }
}
