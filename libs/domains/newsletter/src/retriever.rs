//! Recipient candidates for newsletter issues.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::blocker::EmailAddressBlocker;
use crate::directory::SubscriberDirectory;
use crate::error::NewsletterResult;
use crate::models::{BounceSettings, Campaign, Contact, NewQueueItem, Subscriber, SubscriberKind};

/// Lower-cased address key used for dedup within one generation pass.
pub(crate) fn dedup_key(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Applies the empty, already-seen and blocked rules to one address.
///
/// Returns the trimmed address and records it in `already_generated`.
pub(crate) async fn admit(
    blocker: &dyn EmailAddressBlocker,
    address: &str,
    already_generated: &mut HashSet<String>,
) -> NewsletterResult<Option<String>> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(None);
    }
    let key = dedup_key(address);
    if already_generated.contains(&key) {
        return Ok(None);
    }
    if blocker.is_blocked(address).await? {
        debug!(address, "Skipping blocked address");
        return Ok(None);
    }
    already_generated.insert(key);
    Ok(Some(address.to_string()))
}

/// Builds queue rows from a newsletter's contact and contact-group subscribers.
pub struct RecipientCandidateRetriever<'a> {
    directory: &'a dyn SubscriberDirectory,
    blocker: &'a dyn EmailAddressBlocker,
    bounce: BounceSettings,
    chunk_size: usize,
}

impl<'a> RecipientCandidateRetriever<'a> {
    pub fn new(
        directory: &'a dyn SubscriberDirectory,
        blocker: &'a dyn EmailAddressBlocker,
        bounce: BounceSettings,
        chunk_size: usize,
    ) -> Self {
        Self {
            directory,
            blocker,
            bounce,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Append a row for every eligible recipient of `campaign`.
    ///
    /// `already_generated` holds lower-cased addresses and is shared with the
    /// caller so that one pass never emits an address twice.
    pub async fn fill_recipients(
        &self,
        campaign: &Campaign,
        site_id: i64,
        already_generated: &mut HashSet<String>,
        out: &mut Vec<NewQueueItem>,
    ) -> NewsletterResult<()> {
        let subscribers: Vec<Subscriber> = self
            .directory
            .subscribers(campaign.newsletter_id)
            .await?
            .into_iter()
            .filter(|s| s.site_id == site_id)
            .collect();

        let direct: Vec<(i64, i64)> = subscribers
            .iter()
            .filter_map(|s| match s.kind {
                SubscriberKind::Contact(contact_id) => Some((s.id, contact_id)),
                SubscriberKind::ContactGroup(_) => None,
            })
            .collect();

        for chunk in direct.chunks(self.chunk_size) {
            let ids: Vec<i64> = chunk.iter().map(|(_, contact_id)| *contact_id).collect();
            let contacts = self.directory.contacts(&ids).await?;
            let by_id: HashMap<i64, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();

            for (subscriber_id, contact_id) in chunk {
                match by_id.get(contact_id).copied() {
                    Some(contact) => {
                        self.push_contact(
                            campaign,
                            site_id,
                            Some(*subscriber_id),
                            contact,
                            already_generated,
                            out,
                        )
                        .await?
                    }
                    None => debug!(
                        subscriber_id,
                        contact_id, "Subscriber points at a missing contact"
                    ),
                }
            }
        }

        for subscriber in &subscribers {
            if let SubscriberKind::ContactGroup(group_id) = subscriber.kind {
                self.expand_group(
                    campaign,
                    site_id,
                    subscriber.id,
                    group_id,
                    already_generated,
                    out,
                )
                .await?;
            }
        }

        debug!(
            campaign_id = campaign.id,
            recipients = out.len(),
            "Collected newsletter recipients"
        );
        Ok(())
    }

    /// Append a row for every eligible member of a contact group.
    pub async fn expand_group(
        &self,
        campaign: &Campaign,
        site_id: i64,
        subscriber_id: i64,
        group_id: i64,
        already_generated: &mut HashSet<String>,
        out: &mut Vec<NewQueueItem>,
    ) -> NewsletterResult<()> {
        for contact in self.directory.group_members(group_id).await? {
            self.push_contact(
                campaign,
                site_id,
                Some(subscriber_id),
                &contact,
                already_generated,
                out,
            )
            .await?;
        }
        Ok(())
    }

    /// Append a row for a single contact if it passes every filter.
    pub async fn push_contact(
        &self,
        campaign: &Campaign,
        site_id: i64,
        subscriber_id: Option<i64>,
        contact: &Contact,
        already_generated: &mut HashSet<String>,
        out: &mut Vec<NewQueueItem>,
    ) -> NewsletterResult<()> {
        if self.bounce.excludes(contact) {
            debug!(
                contact_id = contact.id,
                bounces = contact.bounces,
                "Skipping bounced contact"
            );
            return Ok(());
        }
        let Some(email) = contact.email.as_deref() else {
            debug!(contact_id = contact.id, "Skipping contact without email");
            return Ok(());
        };
        if let Some(address) = admit(self.blocker, email, already_generated).await? {
            out.push(
                NewQueueItem::new(campaign.queue_campaign_id(), site_id, address)
                    .subscriber(subscriber_id)
                    .contact(Some(contact.id)),
            );
        }
        Ok(())
    }
}
