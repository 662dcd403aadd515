use std::collections::HashSet;
use tracing::debug;

use crate::blocker::EmailAddressBlocker;
use crate::directory::SubscriberDirectory;
use crate::error::NewsletterResult;
use crate::models::{Campaign, NewQueueItem};
use crate::retriever::admit;

/// Recipient generation for email campaigns, paging through the campaign
/// recipient view.
pub struct CampaignEmailGenerator<'a> {
    directory: &'a dyn SubscriberDirectory,
    blocker: &'a dyn EmailAddressBlocker,
    page_size: usize,
}

impl<'a> CampaignEmailGenerator<'a> {
    pub fn new(
        directory: &'a dyn SubscriberDirectory,
        blocker: &'a dyn EmailAddressBlocker,
        page_size: usize,
    ) -> Self {
        Self {
            directory,
            blocker,
            page_size: page_size.max(1),
        }
    }

    pub async fn generate_for_campaign(
        &self,
        campaign: &Campaign,
        site_id: i64,
        already_generated: &mut HashSet<String>,
        out: &mut Vec<NewQueueItem>,
    ) -> NewsletterResult<()> {
        let mut offset = 0;
        loop {
            let page = self
                .directory
                .campaign_recipients(campaign.id, offset, self.page_size)
                .await?;
            let page_len = page.len();

            for candidate in page {
                let admitted = admit(self.blocker, &candidate.email, already_generated).await?;
                if let Some(address) = admitted {
                    out.push(
                        NewQueueItem::new(campaign.queue_campaign_id(), site_id, address)
                            .subscriber(candidate.subscriber_id)
                            .contact(candidate.contact_id),
                    );
                }
            }

            debug!(campaign_id = campaign.id, offset, page_len, "Read campaign recipient page");
            if page_len < self.page_size {
                break;
            }
            offset += page_len;
        }
        Ok(())
    }
}
