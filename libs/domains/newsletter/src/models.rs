//! Data models for the newsletter dispatch domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

// ============================================================================
// Campaigns
// ============================================================================

/// Lifecycle of a campaign (issue) as it moves through generation and sending.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Idle,
    /// Recipient queue is being generated.
    PreparingData,
    /// Queue generated, waiting for the mailout.
    ReadyForSending,
    /// A/B parent while its variants are sampling the audience.
    TestPhase,
    Sending,
    Finished,
}

/// Where a campaign's audience comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignKind {
    /// Audience is the newsletter's subscribers (contacts and contact groups).
    Newsletter,
    /// Audience is a precomputed campaign recipient view.
    EmailCampaign,
}

/// A single issue of a newsletter or an email campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    /// Set for A/B test variants.
    pub parent_id: Option<i64>,
    pub site_id: i64,
    pub newsletter_id: i64,
    pub kind: CampaignKind,
    pub subject: String,
    pub status: CampaignStatus,
    pub mailout_time: Option<DateTime<Utc>>,
    pub sent_count: u64,
    pub total_recipients: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// A newsletter issue with no mailout scheduled.
    pub fn newsletter(id: i64, site_id: i64, newsletter_id: i64) -> Self {
        Self {
            id,
            parent_id: None,
            site_id,
            newsletter_id,
            kind: CampaignKind::Newsletter,
            subject: format!("Issue {id}"),
            status: CampaignStatus::Idle,
            mailout_time: None,
            sent_count: 0,
            total_recipients: 0,
            last_sent_at: None,
        }
    }

    pub fn email_campaign(id: i64, site_id: i64, newsletter_id: i64) -> Self {
        Self {
            kind: CampaignKind::EmailCampaign,
            ..Self::newsletter(id, site_id, newsletter_id)
        }
    }

    pub fn variant_of(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_mailout(mut self, at: DateTime<Utc>) -> Self {
        self.mailout_time = Some(at);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn is_variant(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Campaign id the queue rows are stored under.
    ///
    /// Variants share their parent's queue.
    pub fn queue_campaign_id(&self) -> i64 {
        self.parent_id.unwrap_or(self.id)
    }

    /// Mailout time is set and not in the future.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.mailout_time.is_some_and(|at| at <= now)
    }
}

/// A/B test configuration stored on the parent campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTest {
    pub parent_campaign_id: i64,
    /// Share of the audience, in percent, split among the variants.
    pub test_size_percentage: u8,
    /// Recipients each variant may send to, computed at generation.
    pub per_variant_quota: Option<u64>,
    pub winner_campaign_id: Option<i64>,
    pub winner_selection_enabled: bool,
}

impl AbTest {
    pub fn new(parent_campaign_id: i64, test_size_percentage: u8) -> Self {
        Self {
            parent_campaign_id,
            test_size_percentage: test_size_percentage.min(100),
            per_variant_quota: None,
            winner_campaign_id: None,
            winner_selection_enabled: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.winner_campaign_id.is_some()
    }

    /// Recipients per variant for a queue of `total` rows.
    pub fn quota_for(&self, total: u64, variant_count: usize) -> u64 {
        if total == 0 || variant_count == 0 {
            return 0;
        }
        let sample = total * u64::from(self.test_size_percentage) / 100;
        (sample / variant_count as u64).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
}

// ============================================================================
// Audience
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum SubscriberKind {
    Contact(i64),
    ContactGroup(i64),
}

/// A newsletter subscription, pointing at a contact or a contact group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub newsletter_id: i64,
    pub site_id: i64,
    pub kind: SubscriberKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub email: Option<String>,
    pub bounces: u32,
}

impl Contact {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: Some(email.into()),
            bounces: 0,
        }
    }
}

/// A row of the campaign recipient view used by email campaigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCandidate {
    pub subscriber_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub email: String,
}

/// Per-site bounce monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BounceSettings {
    pub monitor_bounces: bool,
    pub bounce_limit: u32,
}

impl BounceSettings {
    /// Contacts at or over the limit are dropped while monitoring is on.
    pub fn excludes(&self, contact: &Contact) -> bool {
        self.monitor_bounces && self.bounce_limit > 0 && contact.bounces >= self.bounce_limit
    }
}

// ============================================================================
// Queue
// ============================================================================

/// A persisted queue row: one pending delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub guid: Uuid,
    pub campaign_id: i64,
    pub subscriber_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub site_id: i64,
    pub address: String,
    /// Claimed by a drain.
    pub sending: bool,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn has_failed(&self) -> bool {
        self.last_error.is_some()
    }
}

/// A queue row produced by generation, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub guid: Uuid,
    pub campaign_id: i64,
    pub subscriber_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub site_id: i64,
    pub address: String,
    pub sending: bool,
}

impl NewQueueItem {
    /// Rows start claimed so a concurrent drain cannot pick up a queue that
    /// is still being written.
    pub fn new(campaign_id: i64, site_id: i64, address: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            campaign_id,
            subscriber_id: None,
            contact_id: None,
            site_id,
            address: address.into(),
            sending: true,
        }
    }

    pub fn subscriber(mut self, subscriber_id: Option<i64>) -> Self {
        self.subscriber_id = subscriber_id;
        self
    }

    pub fn contact(mut self, contact_id: Option<i64>) -> Self {
        self.contact_id = contact_id;
        self
    }

    pub fn released(mut self) -> Self {
        self.sending = false;
        self
    }
}
