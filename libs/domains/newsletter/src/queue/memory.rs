use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::{ClaimRequest, CursorKind, QueueStore};
use crate::error::NewsletterResult;
use crate::models::{NewQueueItem, QueueItem};

/// In-memory implementation of QueueStore (for development/testing)
#[derive(Debug, Clone)]
pub struct InMemoryQueueStore {
    rows: Arc<RwLock<BTreeMap<i64, QueueItem>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of a campaign in id order.
    pub async fn items(&self, campaign_id: i64) -> Vec<QueueItem> {
        self.rows
            .read()
            .await
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert_batch(&self, items: Vec<NewQueueItem>) -> NewsletterResult<u64> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let inserted = items.len() as u64;

        for item in items {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            rows.insert(
                id,
                QueueItem {
                    id,
                    guid: item.guid,
                    campaign_id: item.campaign_id,
                    subscriber_id: item.subscriber_id,
                    contact_id: item.contact_id,
                    site_id: item.site_id,
                    address: item.address,
                    sending: item.sending,
                    last_error: None,
                    last_attempt: None,
                    created_at: now,
                },
            );
        }
        Ok(inserted)
    }

    async fn remove_duplicates(&self, campaign_id: i64) -> NewsletterResult<u64> {
        let mut rows = self.rows.write().await;
        let mut seen = HashSet::new();

        // BTreeMap iterates by ascending id, so the first occurrence survives
        let duplicates: Vec<i64> = rows
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .filter(|r| !seen.insert(r.address.to_lowercase()))
            .map(|r| r.id)
            .collect();

        for id in &duplicates {
            rows.remove(id);
        }
        Ok(duplicates.len() as u64)
    }

    async fn reset_sending(&self, campaign_id: Option<i64>) -> NewsletterResult<u64> {
        let mut rows = self.rows.write().await;
        let mut released = 0;
        for row in rows.values_mut() {
            if row.sending && campaign_id.is_none_or(|c| c == row.campaign_id) {
                row.sending = false;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn claim_batch(&self, request: ClaimRequest) -> NewsletterResult<Vec<QueueItem>> {
        let mut rows = self.rows.write().await;

        let mut candidates: Vec<&QueueItem> = rows
            .values()
            .filter(|r| request.accepts(r) && request.after.is_before(r))
            .collect();
        if request.after.kind() == CursorKind::Guid {
            candidates.sort_by_key(|r| r.guid);
        }
        let ids: Vec<i64> = candidates
            .into_iter()
            .take(request.limit)
            .map(|r| r.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = rows.get_mut(&id) {
                row.sending = true;
                row.last_error = None;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> NewsletterResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(&id) {
            row.sending = false;
            row.last_error = Some(error.to_string());
            row.last_attempt = Some(at);
        }
        Ok(())
    }

    async fn delete_sent(&self, campaign_id: i64, ids: &[i64]) -> NewsletterResult<u64> {
        let mut rows = self.rows.write().await;
        let mut deleted = 0;
        for id in ids {
            let deletable = rows
                .get(id)
                .is_some_and(|r| r.campaign_id == campaign_id && r.sending && !r.has_failed());
            if deletable {
                rows.remove(id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn pending_campaigns(&self, include_failed: bool) -> NewsletterResult<Vec<i64>> {
        let rows = self.rows.read().await;
        let busy: HashSet<i64> = rows
            .values()
            .filter(|r| r.sending)
            .map(|r| r.campaign_id)
            .collect();

        let mut pending: Vec<i64> = rows
            .values()
            .filter(|r| !r.sending && (include_failed || !r.has_failed()))
            .map(|r| r.campaign_id)
            .filter(|c| !busy.contains(c))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        pending.sort_unstable();
        Ok(pending)
    }

    async fn count(&self, campaign_id: i64) -> NewsletterResult<u64> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|r| r.campaign_id == campaign_id).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueCursor;

    fn new_rows(campaign_id: i64, addresses: &[&str]) -> Vec<NewQueueItem> {
        addresses
            .iter()
            .map(|a| NewQueueItem::new(campaign_id, 1, *a).released())
            .collect()
    }

    fn claim(campaign_id: i64, after: QueueCursor, limit: usize) -> ClaimRequest {
        ClaimRequest {
            campaign_id,
            after,
            limit,
            include_failed: false,
        }
    }

    #[tokio::test]
    async fn test_remove_duplicates_keeps_lowest_id() {
        let store = InMemoryQueueStore::new();
        store
            .insert_batch(new_rows(1, &["a@x.com", "b@x.com", "A@X.com"]))
            .await
            .unwrap();
        store.insert_batch(new_rows(2, &["a@x.com"])).await.unwrap();

        assert_eq!(store.remove_duplicates(1).await.unwrap(), 1);

        let rows = store.items(1).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].address, "a@x.com");
        assert_eq!(rows[0].id, 1);
        // Other campaigns are untouched
        assert_eq!(store.count(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_by_id_is_ordered_and_exclusive() {
        let store = InMemoryQueueStore::new();
        let addresses: Vec<String> = (0..12).map(|i| format!("r{i}@x.com")).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        store.insert_batch(new_rows(1, &refs)).await.unwrap();

        let first = store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Id), 10))
            .await
            .unwrap();
        assert_eq!(first.len(), 10);
        assert!(first.windows(2).all(|w| w[0].id < w[1].id));
        assert!(first.iter().all(|r| r.sending));

        // Claimed rows are invisible even from the start cursor
        let again = store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Id), 10))
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_by_guid_follows_guid_order() {
        let store = InMemoryQueueStore::new();
        store
            .insert_batch(new_rows(1, &["a@x.com", "b@x.com", "c@x.com", "d@x.com"]))
            .await
            .unwrap();

        let batch = store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Guid), 3))
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.windows(2).all(|w| w[0].guid < w[1].guid));

        let last = QueueCursor::at(CursorKind::Guid, &batch[2]);
        let rest = store.claim_batch(claim(1, last, 3)).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].guid > batch[2].guid);
    }

    #[tokio::test]
    async fn test_failed_rows_wait_for_retry() {
        let store = InMemoryQueueStore::new();
        store.insert_batch(new_rows(1, &["a@x.com"])).await.unwrap();

        let batch = store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Id), 10))
            .await
            .unwrap();
        store
            .record_failure(batch[0].id, "mailbox full", Utc::now())
            .await
            .unwrap();

        // A failed row is not deleted as sent
        assert_eq!(store.delete_sent(1, &[batch[0].id]).await.unwrap(), 0);
        assert!(store.pending_campaigns(false).await.unwrap().is_empty());
        assert_eq!(store.pending_campaigns(true).await.unwrap(), vec![1]);

        let mut retry = claim(1, QueueCursor::start(CursorKind::Id), 10);
        retry.include_failed = true;
        let retried = store.claim_batch(retry).await.unwrap();
        assert_eq!(retried.len(), 1);
        assert!(retried[0].last_error.is_none());
        assert_eq!(store.delete_sent(1, &[retried[0].id]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_sent_requires_claim_and_campaign() {
        let store = InMemoryQueueStore::new();
        store.insert_batch(new_rows(1, &["a@x.com", "b@x.com"])).await.unwrap();

        // Not claimed yet
        assert_eq!(store.delete_sent(1, &[1, 2]).await.unwrap(), 0);

        store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Id), 10))
            .await
            .unwrap();
        assert_eq!(store.delete_sent(2, &[1, 2]).await.unwrap(), 0);
        assert_eq!(store.delete_sent(1, &[1, 2]).await.unwrap(), 2);
        assert_eq!(store.count(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_campaigns_skip_busy_ones() {
        let store = InMemoryQueueStore::new();
        store.insert_batch(new_rows(1, &["a@x.com", "b@x.com"])).await.unwrap();
        store.insert_batch(new_rows(2, &["c@x.com"])).await.unwrap();
        assert_eq!(store.pending_campaigns(false).await.unwrap(), vec![1, 2]);

        store
            .claim_batch(claim(1, QueueCursor::start(CursorKind::Id), 1))
            .await
            .unwrap();
        assert_eq!(store.pending_campaigns(false).await.unwrap(), vec![2]);

        assert_eq!(store.reset_sending(Some(1)).await.unwrap(), 1);
        assert_eq!(store.pending_campaigns(false).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_generated_rows_start_claimed() {
        let store = InMemoryQueueStore::new();
        store
            .insert_batch(vec![NewQueueItem::new(1, 1, "a@x.com")])
            .await
            .unwrap();
        assert!(store.pending_campaigns(false).await.unwrap().is_empty());

        assert_eq!(store.reset_sending(None).await.unwrap(), 1);
        assert_eq!(store.pending_campaigns(false).await.unwrap(), vec![1]);
    }
}
