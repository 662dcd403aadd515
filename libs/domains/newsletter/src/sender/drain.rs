use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{DrainOutcome, DrainReport, QueueSender};
use crate::error::{NewsletterError, NewsletterResult};
use crate::models::{AbTest, Campaign, CampaignStatus, QueueItem};
use crate::queue::{ClaimRequest, CursorKind, QueueCursor};

impl QueueSender {
    /// Walk the campaign's queue by id until nothing claimable is left.
    pub(super) async fn drain_plain(
        &self,
        report: &mut DrainReport,
        campaign: &Campaign,
        send_failed: bool,
        changes: &mut watch::Receiver<u64>,
    ) -> NewsletterResult<DrainOutcome> {
        self.ctx
            .campaigns
            .set_status(campaign.id, CampaignStatus::Sending)
            .await?;

        let mut cursor = QueueCursor::start(CursorKind::Id);
        loop {
            if self.switched_off(changes, campaign.site_id) {
                return Ok(DrainOutcome::Stopped);
            }

            let batch = self
                .ctx
                .queue
                .claim_batch(ClaimRequest {
                    campaign_id: campaign.id,
                    after: cursor,
                    limit: self.config.batch_size,
                    include_failed: send_failed,
                })
                .await?;
            // The cursor also moves past rows that fail, so one drain never retries a row
            let Some(last) = batch.last() else {
                break;
            };
            cursor = QueueCursor::at(CursorKind::Id, last);

            self.process_batch(report, campaign, campaign.id, &[campaign.id], &batch)
                .await?;
        }

        self.ctx
            .campaigns
            .set_status(campaign.id, CampaignStatus::Finished)
            .await?;
        Ok(DrainOutcome::Finished)
    }

    /// Walk the parent's queue in guid order, capped by the variant quota.
    ///
    /// The picked winner has no quota and sends the rest of the audience.
    pub(super) async fn drain_variant(
        &self,
        report: &mut DrainReport,
        variant: &Campaign,
        parent_id: i64,
        send_failed: bool,
        changes: &mut watch::Receiver<u64>,
    ) -> NewsletterResult<DrainOutcome> {
        let test = self
            .ctx
            .campaigns
            .ab_test(parent_id)
            .await?
            .ok_or(NewsletterError::AbTestNotFound(parent_id))?;

        let is_winner = test.winner_campaign_id == Some(variant.id);
        if test.winner_campaign_id.is_some() && !is_winner {
            warn!(
                campaign_id = variant.id,
                parent_id, "Variant lost the A/B test, nothing to send"
            );
            return Ok(DrainOutcome::NothingToSend);
        }

        self.ctx
            .campaigns
            .set_status(variant.id, CampaignStatus::Sending)
            .await?;
        if !test.is_resolved() {
            self.ctx
                .campaigns
                .set_status(parent_id, CampaignStatus::TestPhase)
                .await?;
        }

        let quota = if is_winner {
            None
        } else {
            Some(self.variant_quota(&test).await?)
        };
        let mut sent_so_far = variant.sent_count;
        let mut cursor = QueueCursor::start(CursorKind::Guid);
        let mut outcome = DrainOutcome::Finished;

        loop {
            if self.switched_off(changes, variant.site_id) {
                return Ok(DrainOutcome::Stopped);
            }

            let limit = match quota {
                Some(quota) => {
                    let remaining = quota.saturating_sub(sent_so_far);
                    if remaining == 0 {
                        outcome = DrainOutcome::QuotaReached;
                        break;
                    }
                    usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(self.config.batch_size)
                }
                None => self.config.batch_size,
            };

            let batch = self
                .ctx
                .queue
                .claim_batch(ClaimRequest {
                    campaign_id: parent_id,
                    after: cursor,
                    limit,
                    include_failed: send_failed,
                })
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = QueueCursor::at(CursorKind::Guid, last);

            sent_so_far += self
                .process_batch(report, variant, parent_id, &[variant.id, parent_id], &batch)
                .await?;
        }

        self.finish_variant(variant, parent_id, is_winner).await?;
        Ok(outcome)
    }

    /// Quota of a non-winning variant. A test whose quota was never stored
    /// gets one computed from the parent audience, never an unlimited send.
    async fn variant_quota(&self, test: &AbTest) -> NewsletterResult<u64> {
        if let Some(quota) = test.per_variant_quota {
            return Ok(quota);
        }

        let parent_id = test.parent_campaign_id;
        let parent = self
            .ctx
            .campaigns
            .campaign(parent_id)
            .await?
            .ok_or(NewsletterError::CampaignNotFound(parent_id))?;
        let total = if parent.total_recipients > 0 {
            parent.total_recipients
        } else {
            self.ctx.queue.count(parent_id).await? + parent.sent_count
        };
        let variants = self.ctx.campaigns.variants(parent_id).await?;

        let quota = test.quota_for(total, variants.len());
        warn!(parent_id, total, quota, "A/B test had no stored variant quota");
        Ok(quota)
    }

    async fn finish_variant(
        &self,
        variant: &Campaign,
        parent_id: i64,
        is_winner: bool,
    ) -> NewsletterResult<()> {
        self.ctx
            .campaigns
            .set_status(variant.id, CampaignStatus::Finished)
            .await?;

        if is_winner {
            self.ctx
                .campaigns
                .set_status(parent_id, CampaignStatus::Finished)
                .await?;
            info!(campaign_id = variant.id, parent_id, "Winner finished sending the remainder");
            return Ok(());
        }

        let variants = self.ctx.campaigns.variants(parent_id).await?;
        if variants.iter().all(|v| v.status == CampaignStatus::Finished) {
            self.ctx.winner.schedule(parent_id).await?;
            info!(parent_id, "All variants finished, winner selection scheduled");
        }
        Ok(())
    }

    /// Send every claimed row, then delete the delivered ones and bump the
    /// counters of `counter_ids`. Settling happens even when a failure could
    /// not be recorded. Returns the number delivered.
    async fn process_batch(
        &self,
        report: &mut DrainReport,
        campaign: &Campaign,
        queue_campaign_id: i64,
        counter_ids: &[i64],
        batch: &[QueueItem],
    ) -> NewsletterResult<u64> {
        let mut delivered = Vec::with_capacity(batch.len());
        let mut failed = 0;
        let mut fatal = None;

        for item in batch {
            match self.deliver(campaign, item).await {
                Ok(()) => delivered.push(item.id),
                Err(err) => {
                    failed += 1;
                    warn!(
                        campaign_id = campaign.id,
                        queue_id = item.id,
                        address = %item.address,
                        error = %err,
                        "Delivery failed"
                    );
                    if let Err(store_err) = self
                        .ctx
                        .queue
                        .record_failure(item.id, &err.to_string(), Utc::now())
                        .await
                    {
                        fatal = Some(store_err);
                        break;
                    }
                }
            }
        }

        let settled = self.settle(queue_campaign_id, counter_ids, &delivered).await;
        report.sent += delivered.len() as u64;
        report.failed += failed;
        debug!(
            campaign_id = campaign.id,
            claimed = batch.len(),
            delivered = delivered.len(),
            failed,
            "Batch processed"
        );

        if let Some(err) = fatal {
            return Err(err);
        }
        settled?;
        Ok(delivered.len() as u64)
    }

    async fn deliver(&self, campaign: &Campaign, item: &QueueItem) -> NewsletterResult<()> {
        let email = self.ctx.renderer.render(item, campaign).await?;
        let sent = self.ctx.transport.send(item.site_id, &email).await?;
        if !sent.accepted {
            return Err(NewsletterError::Transport(format!(
                "{} did not accept the message",
                self.ctx.transport.name()
            )));
        }
        debug!(queue_id = item.id, message_id = ?sent.message_id, "Delivered");
        Ok(())
    }

    async fn settle(
        &self,
        queue_campaign_id: i64,
        counter_ids: &[i64],
        delivered: &[i64],
    ) -> NewsletterResult<()> {
        if delivered.is_empty() {
            return Ok(());
        }

        let deleted = self
            .ctx
            .queue
            .delete_sent(queue_campaign_id, delivered)
            .await?;
        if deleted != delivered.len() as u64 {
            warn!(
                campaign_id = queue_campaign_id,
                delivered = delivered.len(),
                deleted,
                "Some delivered rows were already gone"
            );
        }

        let now = Utc::now();
        for id in counter_ids {
            self.ctx
                .campaigns
                .record_sent(*id, delivered.len() as u64, now)
                .await?;
        }
        Ok(())
    }

    /// True when sending is off for the site. Checked before every batch;
    /// a pending settings notification is only logged.
    fn switched_off(&self, changes: &mut watch::Receiver<u64>, site_id: i64) -> bool {
        if changes.has_changed().unwrap_or(false) {
            let generation = *changes.borrow_and_update();
            debug!(site_id, generation, "Sending settings changed during drain");
        }

        let enabled = self.ctx.sending_enabled(site_id);
        if !enabled {
            warn!(site_id, "Sending switched off, stopping drain");
        }
        !enabled
    }
}
