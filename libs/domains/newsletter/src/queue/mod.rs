//! Persisted newsletter email queue.
//!
//! Every mutation is conditioned on campaign id plus the claimed marker so
//! that a drain only ever touches rows it claimed itself.

mod entity;
mod memory;
mod postgres;

pub use memory::InMemoryQueueStore;
pub use postgres::{PgQueueStore, connect};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::NewsletterResult;
use crate::models::{NewQueueItem, QueueItem};

/// Which column a drain walks the queue by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Insertion order.
    Id,
    /// Random order; variants sample the audience this way.
    Guid,
}

/// Position of a drain in the queue. Claims return rows strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueCursor {
    Id(i64),
    Guid(Uuid),
}

impl QueueCursor {
    /// Cursor positioned before every row.
    pub fn start(kind: CursorKind) -> Self {
        match kind {
            CursorKind::Id => QueueCursor::Id(0),
            CursorKind::Guid => QueueCursor::Guid(Uuid::nil()),
        }
    }

    pub fn kind(&self) -> CursorKind {
        match self {
            QueueCursor::Id(_) => CursorKind::Id,
            QueueCursor::Guid(_) => CursorKind::Guid,
        }
    }

    /// Cursor sitting on `item`.
    pub fn at(kind: CursorKind, item: &QueueItem) -> Self {
        match kind {
            CursorKind::Id => QueueCursor::Id(item.id),
            CursorKind::Guid => QueueCursor::Guid(item.guid),
        }
    }

    pub fn is_before(&self, item: &QueueItem) -> bool {
        match self {
            QueueCursor::Id(id) => item.id > *id,
            QueueCursor::Guid(guid) => item.guid > *guid,
        }
    }
}

/// Parameters of a single claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    pub campaign_id: i64,
    pub after: QueueCursor,
    pub limit: usize,
    /// Also take rows whose previous attempt failed.
    pub include_failed: bool,
}

impl ClaimRequest {
    /// Whether `item` may be claimed, ignoring the cursor.
    pub fn accepts(&self, item: &QueueItem) -> bool {
        item.campaign_id == self.campaign_id
            && !item.sending
            && (self.include_failed || !item.has_failed())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Bulk insert; returns the number of rows written.
    async fn insert_batch(&self, items: Vec<NewQueueItem>) -> NewsletterResult<u64>;

    /// Drop rows whose address repeats within the campaign (case-insensitive),
    /// keeping the lowest id. Returns the number of rows removed.
    async fn remove_duplicates(&self, campaign_id: i64) -> NewsletterResult<u64>;

    /// Clear the claimed marker for one campaign, or for every campaign.
    async fn reset_sending(&self, campaign_id: Option<i64>) -> NewsletterResult<u64>;

    /// Atomically claim up to `limit` rows past the cursor, in cursor order.
    ///
    /// Claimed rows are marked sending and their previous error is cleared.
    async fn claim_batch(&self, request: ClaimRequest) -> NewsletterResult<Vec<QueueItem>>;

    /// Persist a failed attempt and release the row.
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> NewsletterResult<()>;

    /// Delete delivered rows. Only rows of `campaign_id` that are still
    /// claimed and carry no error are removed.
    async fn delete_sent(&self, campaign_id: i64, ids: &[i64]) -> NewsletterResult<u64>;

    /// Campaigns with claimable rows and no rows currently claimed.
    async fn pending_campaigns(&self, include_failed: bool) -> NewsletterResult<Vec<i64>>;

    async fn count(&self, campaign_id: i64) -> NewsletterResult<u64>;
}
