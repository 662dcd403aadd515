//! Queue generation: retrieval, license cap, bulk write, dedup and status.

use std::collections::HashSet;
use strum::Display;
use tracing::{debug, info, instrument, warn};

use crate::blocker::{OnDemandBlocker, PreloadedBlocker};
use crate::campaign_generator::CampaignEmailGenerator;
use crate::config::DispatchConfig;
use crate::context::DispatchContext;
use crate::error::{NewsletterError, NewsletterResult};
use crate::license::RecipientCap;
use crate::models::{
    AbTest, Campaign, CampaignKind, CampaignStatus, NewQueueItem, Site, SubscriberKind,
};
use crate::retriever::RecipientCandidateRetriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    SiteNotFound,
    Unlicensed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Queue written; `recipients` is the row count after dedup.
    Generated { campaign_id: i64, recipients: u64 },
    Skipped { campaign_id: i64, reason: SkipReason },
}

pub struct QueueGenerator {
    ctx: DispatchContext,
    config: DispatchConfig,
}

impl QueueGenerator {
    pub fn new(ctx: DispatchContext, config: DispatchConfig) -> Self {
        Self { ctx, config }
    }

    /// Generate the recipient queue of a campaign.
    ///
    /// Variants generate into their parent's queue. Duplicates are pruned
    /// whether or not generation succeeds. On failure the campaign (and
    /// parent) statuses are put back to what they were.
    #[instrument(skip(self))]
    pub async fn generate(&self, campaign_id: i64) -> NewsletterResult<GenerationOutcome> {
        let campaign = self.load_campaign(campaign_id).await?;

        let Some(site) = self.ctx.campaigns.site(campaign.site_id).await? else {
            warn!(
                campaign_id,
                site_id = campaign.site_id,
                "Site not found, skipping queue generation"
            );
            return Ok(GenerationOutcome::Skipped {
                campaign_id,
                reason: SkipReason::SiteNotFound,
            });
        };
        if !self.ctx.license.is_site_licensed(&site).await {
            warn!(
                campaign_id,
                site = %site.name,
                "Site is not licensed for newsletters, skipping queue generation"
            );
            return Ok(GenerationOutcome::Skipped {
                campaign_id,
                reason: SkipReason::Unlicensed,
            });
        }

        let previous = self.mark_preparing(&campaign).await?;
        match self.populate(&campaign, &site).await {
            Ok(recipients) => Ok(GenerationOutcome::Generated {
                campaign_id,
                recipients,
            }),
            Err(err) => {
                warn!(campaign_id, error = %err, "Queue generation failed");
                self.restore(&previous).await;
                Err(err)
            }
        }
    }

    /// Queue one subscriber (a contact, or every member of a group) for an
    /// already generated campaign. Returns the number of rows added.
    #[instrument(skip(self))]
    pub async fn generate_for_subscriber(
        &self,
        campaign_id: i64,
        subscriber_id: i64,
    ) -> NewsletterResult<u64> {
        let campaign = self.load_campaign(campaign_id).await?;
        let subscriber = self
            .ctx
            .directory
            .subscriber(subscriber_id)
            .await?
            .ok_or(NewsletterError::SubscriberNotFound(subscriber_id))?;

        let blocker =
            OnDemandBlocker::new(self.ctx.unsubscriptions.clone(), campaign.newsletter_id);
        let retriever = RecipientCandidateRetriever::new(
            self.ctx.directory.as_ref(),
            &blocker,
            self.ctx.settings.bounce_settings(campaign.site_id),
            self.config.contact_chunk_size,
        );

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        match subscriber.kind {
            SubscriberKind::Contact(contact_id) => {
                let contacts = self.ctx.directory.contacts(&[contact_id]).await?;
                match contacts.first() {
                    Some(contact) => {
                        retriever
                            .push_contact(
                                &campaign,
                                campaign.site_id,
                                Some(subscriber.id),
                                contact,
                                &mut seen,
                                &mut rows,
                            )
                            .await?
                    }
                    None => debug!(
                        subscriber_id,
                        contact_id, "Subscriber points at a missing contact"
                    ),
                }
            }
            SubscriberKind::ContactGroup(group_id) => {
                retriever
                    .expand_group(
                        &campaign,
                        campaign.site_id,
                        subscriber.id,
                        group_id,
                        &mut seen,
                        &mut rows,
                    )
                    .await?
            }
        }

        // Complete rows can be released straight away
        let rows: Vec<NewQueueItem> = rows.into_iter().map(NewQueueItem::released).collect();
        let inserted = if rows.is_empty() {
            0
        } else {
            self.ctx.queue.insert_batch(rows).await?
        };
        let removed = self
            .ctx
            .queue
            .remove_duplicates(campaign.queue_campaign_id())
            .await?;

        let added = inserted.saturating_sub(removed);
        info!(campaign_id, subscriber_id, added, "Queued subscriber");
        Ok(added)
    }

    async fn load_campaign(&self, campaign_id: i64) -> NewsletterResult<Campaign> {
        self.ctx
            .campaigns
            .campaign(campaign_id)
            .await?
            .ok_or(NewsletterError::CampaignNotFound(campaign_id))
    }

    /// Switch the campaign (and its parent) to PreparingData, returning the
    /// statuses to restore on failure.
    async fn mark_preparing(
        &self,
        campaign: &Campaign,
    ) -> NewsletterResult<Vec<(i64, CampaignStatus)>> {
        let mut previous = vec![(campaign.id, campaign.status)];
        if let Some(parent_id) = campaign.parent_id {
            let parent = self.load_campaign(parent_id).await?;
            previous.push((parent.id, parent.status));
        }
        for (id, _) in &previous {
            self.ctx
                .campaigns
                .set_status(*id, CampaignStatus::PreparingData)
                .await?;
        }
        Ok(previous)
    }

    async fn restore(&self, previous: &[(i64, CampaignStatus)]) {
        for (id, status) in previous {
            if let Err(err) = self.ctx.campaigns.set_status(*id, *status).await {
                warn!(campaign_id = id, error = %err, "Failed to restore campaign status");
            }
        }
    }

    async fn populate(&self, campaign: &Campaign, site: &Site) -> NewsletterResult<u64> {
        let queue_campaign_id = campaign.queue_campaign_id();

        let built = self.build_queue(campaign, site).await;
        let deduped = self.ctx.queue.remove_duplicates(queue_campaign_id).await;
        if let (Err(_), Err(err)) = (&built, &deduped) {
            warn!(campaign_id = queue_campaign_id, error = %err, "Duplicate removal failed");
        }
        let inserted = built?;
        let removed = deduped?;

        let total = self.ctx.queue.count(queue_campaign_id).await?;
        // A/B parents get their quota whichever campaign of the test was generated
        match self.ctx.campaigns.ab_test(queue_campaign_id).await? {
            Some(test) => self.assign_variant_quota(test, total).await?,
            None if campaign.is_variant() => {
                return Err(NewsletterError::AbTestNotFound(queue_campaign_id));
            }
            None => {}
        }

        self.ctx
            .campaigns
            .set_total_recipients(queue_campaign_id, total)
            .await?;
        self.ctx
            .campaigns
            .set_status(campaign.id, CampaignStatus::ReadyForSending)
            .await?;
        if let Some(parent_id) = campaign.parent_id {
            self.ctx
                .campaigns
                .set_status(parent_id, CampaignStatus::ReadyForSending)
                .await?;
        }

        info!(
            campaign_id = campaign.id,
            inserted, removed, total, "Queue generated"
        );
        Ok(total)
    }

    /// Retrieve, cap-check and write the rows. Rows stay claimed until the
    /// whole batch is written.
    async fn build_queue(&self, campaign: &Campaign, site: &Site) -> NewsletterResult<u64> {
        let blocker =
            PreloadedBlocker::load(self.ctx.unsubscriptions.as_ref(), campaign.newsletter_id)
                .await?;
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        match campaign.kind {
            CampaignKind::Newsletter => {
                RecipientCandidateRetriever::new(
                    self.ctx.directory.as_ref(),
                    &blocker,
                    self.ctx.settings.bounce_settings(site.id),
                    self.config.contact_chunk_size,
                )
                .fill_recipients(campaign, site.id, &mut seen, &mut rows)
                .await?
            }
            CampaignKind::EmailCampaign => {
                CampaignEmailGenerator::new(
                    self.ctx.directory.as_ref(),
                    &blocker,
                    self.config.campaign_page_size,
                )
                .generate_for_campaign(campaign, site.id, &mut seen, &mut rows)
                .await?
            }
        }

        if let RecipientCap::Limited(limit) = self.ctx.license.recipient_cap(site).await {
            if rows.len() > limit {
                warn!(
                    campaign_id = campaign.id,
                    limit,
                    count = rows.len(),
                    "Recipient limit exceeded"
                );
                return Err(NewsletterError::RecipientLimitExceeded {
                    limit,
                    count: rows.len(),
                });
            }
        }

        let inserted = if rows.is_empty() {
            0
        } else {
            self.ctx.queue.insert_batch(rows).await?
        };
        self.ctx
            .queue
            .reset_sending(Some(campaign.queue_campaign_id()))
            .await?;
        Ok(inserted)
    }

    async fn assign_variant_quota(&self, mut test: AbTest, total: u64) -> NewsletterResult<()> {
        let parent_id = test.parent_campaign_id;
        let variants = self.ctx.campaigns.variants(parent_id).await?;

        let quota = test.quota_for(total, variants.len());
        test.per_variant_quota = Some(quota);
        self.ctx.campaigns.save_ab_test(test).await?;
        for variant in &variants {
            self.ctx
                .campaigns
                .set_total_recipients(variant.id, quota)
                .await?;
        }
        debug!(
            parent_id,
            quota,
            variants = variants.len(),
            "Assigned variant quota"
        );
        Ok(())
    }
}
