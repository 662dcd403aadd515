#![allow(dead_code)]

use chrono::{Duration, Utc};
use domain_newsletter::{
    BasicRenderer, Campaign, Contact, DispatchConfig, DispatchContext, InMemoryCampaignRepository,
    InMemoryDirectory, InMemoryQueueStore, InMemoryUnsubscriptions, NewsletterService,
    RecordingTransport, RecordingWinnerScheduler, Site, StaticLicense, StaticSettings, Subscriber,
    SubscriberKind,
};
use std::sync::Arc;

pub const SITE_ID: i64 = 1;
pub const NEWSLETTER_ID: i64 = 7;

/// Whole pipeline wired to in-memory collaborators.
pub struct Harness {
    pub campaigns: InMemoryCampaignRepository,
    pub directory: InMemoryDirectory,
    pub queue: InMemoryQueueStore,
    pub unsubscriptions: InMemoryUnsubscriptions,
    pub settings: Arc<StaticSettings>,
    pub winner: RecordingWinnerScheduler,
    pub transport: RecordingTransport,
    pub service: NewsletterService,
}

pub struct HarnessBuilder {
    license: StaticLicense,
    transport: RecordingTransport,
    config: DispatchConfig,
}

impl HarnessBuilder {
    pub fn license(mut self, license: StaticLicense) -> Self {
        self.license = license;
        self
    }

    pub fn transport(mut self, transport: RecordingTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config = self.config.with_batch_size(batch_size);
        self
    }

    pub async fn build(self) -> Harness {
        let campaigns = InMemoryCampaignRepository::new();
        campaigns
            .insert_site(Site {
                id: SITE_ID,
                name: "main".to_string(),
            })
            .await;

        let directory = InMemoryDirectory::new();
        let queue = InMemoryQueueStore::new();
        let unsubscriptions = InMemoryUnsubscriptions::new();
        let settings = Arc::new(StaticSettings::new());
        let winner = RecordingWinnerScheduler::new();

        let ctx = DispatchContext {
            campaigns: Arc::new(campaigns.clone()),
            directory: Arc::new(directory.clone()),
            queue: Arc::new(queue.clone()),
            unsubscriptions: Arc::new(unsubscriptions.clone()),
            settings: settings.clone(),
            license: Arc::new(self.license),
            winner: Arc::new(winner.clone()),
            renderer: Arc::new(BasicRenderer),
            transport: Arc::new(self.transport.clone()),
        };

        Harness {
            campaigns,
            directory,
            queue,
            unsubscriptions,
            settings,
            winner,
            transport: self.transport,
            service: NewsletterService::new(ctx, self.config),
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            license: StaticLicense::unlimited(),
            transport: RecordingTransport::new(),
            config: DispatchConfig::default(),
        }
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    /// A newsletter issue whose mailout time has passed.
    pub async fn due_campaign(&self, id: i64) -> Campaign {
        let campaign = Campaign::newsletter(id, SITE_ID, NEWSLETTER_ID)
            .with_mailout(Utc::now() - Duration::minutes(1));
        self.campaigns.insert(campaign.clone()).await;
        campaign
    }

    /// Subscribe a fresh contact per address, ids starting at `first_id`.
    pub async fn subscribe_contacts(&self, first_id: i64, addresses: &[&str]) {
        for (offset, address) in addresses.iter().enumerate() {
            let id = first_id + offset as i64;
            self.directory.add_contact(Contact::new(id, *address)).await;
            self.directory
                .add_subscriber(Subscriber {
                    id,
                    newsletter_id: NEWSLETTER_ID,
                    site_id: SITE_ID,
                    kind: SubscriberKind::Contact(id),
                })
                .await;
        }
    }

    pub async fn subscribe_many(&self, count: usize) {
        let addresses: Vec<String> = (0..count).map(|i| format!("reader{i}@example.com")).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        self.subscribe_contacts(1, &refs).await;
    }
}
