use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{NewsletterError, NewsletterResult};
use crate::models::{AbTest, Campaign, CampaignStatus, Site};

/// Campaign, site and A/B test persistence owned by the CMS.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn campaign(&self, id: i64) -> NewsletterResult<Option<Campaign>>;

    /// Campaigns for the given ids; unknown ids are left out.
    async fn campaigns(&self, ids: &[i64]) -> NewsletterResult<Vec<Campaign>>;

    async fn variants(&self, parent_id: i64) -> NewsletterResult<Vec<Campaign>>;

    async fn site(&self, site_id: i64) -> NewsletterResult<Option<Site>>;

    async fn set_status(&self, id: i64, status: CampaignStatus) -> NewsletterResult<()>;

    async fn set_total_recipients(&self, id: i64, total: u64) -> NewsletterResult<()>;

    /// Add `count` to the sent counter and stamp the last send time.
    async fn record_sent(&self, id: i64, count: u64, at: DateTime<Utc>) -> NewsletterResult<()>;

    async fn ab_test(&self, parent_id: i64) -> NewsletterResult<Option<AbTest>>;

    async fn save_ab_test(&self, test: AbTest) -> NewsletterResult<()>;

    /// A/B tests that have no winner yet.
    async fn unresolved_ab_tests(&self) -> NewsletterResult<Vec<AbTest>>;
}

#[derive(Debug, Default)]
struct CampaignState {
    campaigns: HashMap<i64, Campaign>,
    sites: HashMap<i64, Site>,
    ab_tests: HashMap<i64, AbTest>,
}

/// In-memory implementation of CampaignRepository (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryCampaignRepository {
    state: Arc<RwLock<CampaignState>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, campaign: Campaign) {
        self.state.write().await.campaigns.insert(campaign.id, campaign);
    }

    pub async fn insert_site(&self, site: Site) {
        self.state.write().await.sites.insert(site.id, site);
    }

    fn with_campaign<T>(
        state: &mut CampaignState,
        id: i64,
        f: impl FnOnce(&mut Campaign) -> T,
    ) -> NewsletterResult<T> {
        state
            .campaigns
            .get_mut(&id)
            .map(f)
            .ok_or(NewsletterError::CampaignNotFound(id))
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn campaign(&self, id: i64) -> NewsletterResult<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn campaigns(&self, ids: &[i64]) -> NewsletterResult<Vec<Campaign>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.campaigns.get(id).cloned())
            .collect())
    }

    async fn variants(&self, parent_id: i64) -> NewsletterResult<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut variants: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect();
        variants.sort_by_key(|c| c.id);
        Ok(variants)
    }

    async fn site(&self, site_id: i64) -> NewsletterResult<Option<Site>> {
        Ok(self.state.read().await.sites.get(&site_id).cloned())
    }

    async fn set_status(&self, id: i64, status: CampaignStatus) -> NewsletterResult<()> {
        let mut state = self.state.write().await;
        Self::with_campaign(&mut state, id, |c| c.status = status)
    }

    async fn set_total_recipients(&self, id: i64, total: u64) -> NewsletterResult<()> {
        let mut state = self.state.write().await;
        Self::with_campaign(&mut state, id, |c| c.total_recipients = total)
    }

    async fn record_sent(&self, id: i64, count: u64, at: DateTime<Utc>) -> NewsletterResult<()> {
        let mut state = self.state.write().await;
        Self::with_campaign(&mut state, id, |c| {
            c.sent_count += count;
            c.last_sent_at = Some(at);
        })
    }

    async fn ab_test(&self, parent_id: i64) -> NewsletterResult<Option<AbTest>> {
        Ok(self.state.read().await.ab_tests.get(&parent_id).cloned())
    }

    async fn save_ab_test(&self, test: AbTest) -> NewsletterResult<()> {
        self.state
            .write()
            .await
            .ab_tests
            .insert(test.parent_campaign_id, test);
        Ok(())
    }

    async fn unresolved_ab_tests(&self) -> NewsletterResult<Vec<AbTest>> {
        let state = self.state.read().await;
        let mut tests: Vec<AbTest> = state
            .ab_tests
            .values()
            .filter(|t| !t.is_resolved())
            .cloned()
            .collect();
        tests.sort_by_key(|t| t.parent_campaign_id);
        Ok(tests)
    }
}
