use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::NewsletterResult;
use crate::models::{Contact, RecipientCandidate, Subscriber};

/// Read access to subscribers, contacts and campaign audiences.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// All subscriptions of a newsletter, in subscription order.
    async fn subscribers(&self, newsletter_id: i64) -> NewsletterResult<Vec<Subscriber>>;

    async fn subscriber(&self, subscriber_id: i64) -> NewsletterResult<Option<Subscriber>>;

    /// Contacts for the given ids; unknown ids are left out.
    async fn contacts(&self, contact_ids: &[i64]) -> NewsletterResult<Vec<Contact>>;

    async fn group_members(&self, group_id: i64) -> NewsletterResult<Vec<Contact>>;

    /// One page of the campaign recipient view.
    async fn campaign_recipients(
        &self,
        campaign_id: i64,
        offset: usize,
        limit: usize,
    ) -> NewsletterResult<Vec<RecipientCandidate>>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    subscribers: Vec<Subscriber>,
    contacts: HashMap<i64, Contact>,
    groups: HashMap<i64, Vec<i64>>,
    campaign_recipients: HashMap<i64, Vec<RecipientCandidate>>,
}

/// In-memory implementation of SubscriberDirectory (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.state.write().await.contacts.insert(contact.id, contact);
    }

    pub async fn add_group(&self, group_id: i64, contact_ids: Vec<i64>) {
        self.state.write().await.groups.insert(group_id, contact_ids);
    }

    pub async fn add_subscriber(&self, subscriber: Subscriber) {
        self.state.write().await.subscribers.push(subscriber);
    }

    pub async fn set_campaign_recipients(
        &self,
        campaign_id: i64,
        recipients: Vec<RecipientCandidate>,
    ) {
        self.state
            .write()
            .await
            .campaign_recipients
            .insert(campaign_id, recipients);
    }
}

#[async_trait]
impl SubscriberDirectory for InMemoryDirectory {
    async fn subscribers(&self, newsletter_id: i64) -> NewsletterResult<Vec<Subscriber>> {
        let state = self.state.read().await;
        Ok(state
            .subscribers
            .iter()
            .filter(|s| s.newsletter_id == newsletter_id)
            .cloned()
            .collect())
    }

    async fn subscriber(&self, subscriber_id: i64) -> NewsletterResult<Option<Subscriber>> {
        let state = self.state.read().await;
        Ok(state.subscribers.iter().find(|s| s.id == subscriber_id).cloned())
    }

    async fn contacts(&self, contact_ids: &[i64]) -> NewsletterResult<Vec<Contact>> {
        let state = self.state.read().await;
        Ok(contact_ids
            .iter()
            .filter_map(|id| state.contacts.get(id).cloned())
            .collect())
    }

    async fn group_members(&self, group_id: i64) -> NewsletterResult<Vec<Contact>> {
        let state = self.state.read().await;
        let members = state.groups.get(&group_id).map(Vec::as_slice).unwrap_or_default();
        Ok(members
            .iter()
            .filter_map(|id| state.contacts.get(id).cloned())
            .collect())
    }

    async fn campaign_recipients(
        &self,
        campaign_id: i64,
        offset: usize,
        limit: usize,
    ) -> NewsletterResult<Vec<RecipientCandidate>> {
        let state = self.state.read().await;
        Ok(state
            .campaign_recipients
            .get(&campaign_id)
            .map(|rows| rows.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriberKind;

    #[tokio::test]
    async fn test_group_members_skip_unknown_contacts() {
        let directory = InMemoryDirectory::new();
        directory.add_contact(Contact::new(1, "a@example.com")).await;
        directory.add_group(9, vec![1, 2]).await;

        let members = directory.group_members(9).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, 1);
        assert!(directory.group_members(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_filtered_by_newsletter() {
        let directory = InMemoryDirectory::new();
        for (id, newsletter_id) in [(1, 5), (2, 6), (3, 5)] {
            directory
                .add_subscriber(Subscriber {
                    id,
                    newsletter_id,
                    site_id: 1,
                    kind: SubscriberKind::Contact(id),
                })
                .await;
        }

        let ids: Vec<i64> = directory
            .subscribers(5)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_campaign_recipient_pages() {
        let directory = InMemoryDirectory::new();
        let rows = (0..5)
            .map(|i| RecipientCandidate {
                subscriber_id: None,
                contact_id: Some(i),
                email: format!("r{i}@example.com"),
            })
            .collect();
        directory.set_campaign_recipients(4, rows).await;

        assert_eq!(directory.campaign_recipients(4, 0, 2).await.unwrap().len(), 2);
        assert_eq!(directory.campaign_recipients(4, 4, 2).await.unwrap().len(), 1);
        assert!(directory.campaign_recipients(4, 6, 2).await.unwrap().is_empty());
    }
}
