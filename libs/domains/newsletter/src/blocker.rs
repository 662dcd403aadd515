//! Address suppression for recipient generation.
//!
//! Bulk generation preloads every blocked address of a newsletter once;
//! single-subscriber sends look addresses up one at a time.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::NewsletterResult;

/// Source of unsubscribed addresses for a newsletter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnsubscriptionSource: Send + Sync {
    /// Every address that must not receive the newsletter.
    async fn unsubscribed_addresses(&self, newsletter_id: i64) -> NewsletterResult<Vec<String>>;

    async fn is_unsubscribed(&self, newsletter_id: i64, address: &str) -> NewsletterResult<bool>;
}

#[async_trait]
pub trait EmailAddressBlocker: Send + Sync {
    async fn is_blocked(&self, address: &str) -> NewsletterResult<bool>;
}

/// Blocker backed by a lower-cased set loaded once per generation pass.
#[derive(Debug, Default, Clone)]
pub struct PreloadedBlocker {
    blocked: HashSet<String>,
}

impl PreloadedBlocker {
    pub async fn load(
        source: &dyn UnsubscriptionSource,
        newsletter_id: i64,
    ) -> NewsletterResult<Self> {
        let blocker = Self::from_addresses(source.unsubscribed_addresses(newsletter_id).await?);
        debug!(
            newsletter_id,
            blocked = blocker.len(),
            "Preloaded blocked addresses"
        );
        Ok(blocker)
    }

    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[async_trait]
impl EmailAddressBlocker for PreloadedBlocker {
    async fn is_blocked(&self, address: &str) -> NewsletterResult<bool> {
        Ok(self.blocked.contains(&address.trim().to_lowercase()))
    }
}

/// Blocker that asks the source for every address.
pub struct OnDemandBlocker {
    source: Arc<dyn UnsubscriptionSource>,
    newsletter_id: i64,
}

impl OnDemandBlocker {
    pub fn new(source: Arc<dyn UnsubscriptionSource>, newsletter_id: i64) -> Self {
        Self {
            source,
            newsletter_id,
        }
    }
}

#[async_trait]
impl EmailAddressBlocker for OnDemandBlocker {
    async fn is_blocked(&self, address: &str) -> NewsletterResult<bool> {
        self.source
            .is_unsubscribed(self.newsletter_id, address.trim())
            .await
    }
}

/// In-memory unsubscription list (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryUnsubscriptions {
    by_newsletter: Arc<RwLock<HashMap<i64, HashSet<String>>>>,
}

impl InMemoryUnsubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn unsubscribe(&self, newsletter_id: i64, address: &str) {
        self.by_newsletter
            .write()
            .await
            .entry(newsletter_id)
            .or_default()
            .insert(address.trim().to_lowercase());
    }
}

#[async_trait]
impl UnsubscriptionSource for InMemoryUnsubscriptions {
    async fn unsubscribed_addresses(&self, newsletter_id: i64) -> NewsletterResult<Vec<String>> {
        let lists = self.by_newsletter.read().await;
        Ok(lists
            .get(&newsletter_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_unsubscribed(&self, newsletter_id: i64, address: &str) -> NewsletterResult<bool> {
        let lists = self.by_newsletter.read().await;
        Ok(lists
            .get(&newsletter_id)
            .is_some_and(|set| set.contains(&address.to_lowercase())))
    }
}
