use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_config::database::DatabaseConfig;
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Statement,
    TransactionTrait,
};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::entity::{self, Column, Entity};
use super::{ClaimRequest, QueueCursor, QueueStore};
use crate::error::NewsletterResult;
use crate::models::{NewQueueItem, QueueItem};

/// Deletes every row whose lower-cased address already appears on a row with
/// a lower id in the same campaign.
const REMOVE_DUPLICATES_SQL: &str = r#"
    DELETE FROM newsletter_email_queue dup
    USING newsletter_email_queue keep
    WHERE dup.campaign_id = $1
      AND keep.campaign_id = $1
      AND lower(keep.address) = lower(dup.address)
      AND keep.id < dup.id
"#;

/// Connect to the queue database with the configured pool size.
pub async fn connect(config: &DatabaseConfig) -> NewsletterResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("Connected to newsletter queue database");
    Ok(db)
}

/// Postgres implementation of QueueStore
pub struct PgQueueStore {
    db: DatabaseConnection,
    insert_chunk_size: usize,
}

impl PgQueueStore {
    pub fn new(db: DatabaseConnection, insert_chunk_size: usize) -> Self {
        Self {
            db,
            insert_chunk_size: insert_chunk_size.max(1),
        }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert_batch(&self, items: Vec<NewQueueItem>) -> NewsletterResult<u64> {
        let mut inserted = 0;
        for chunk in items.chunks(self.insert_chunk_size) {
            let models = chunk.iter().cloned().map(entity::ActiveModel::from);
            inserted += Entity::insert_many(models)
                .exec_without_returning(&self.db)
                .await?;
        }
        debug!(inserted, "Inserted queue rows");
        Ok(inserted)
    }

    async fn remove_duplicates(&self, campaign_id: i64) -> NewsletterResult<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            REMOVE_DUPLICATES_SQL,
            [campaign_id.into()],
        );
        let removed = self.db.execute_raw(stmt).await?.rows_affected();
        if removed > 0 {
            debug!(campaign_id, removed, "Removed duplicate queue rows");
        }
        Ok(removed)
    }

    async fn reset_sending(&self, campaign_id: Option<i64>) -> NewsletterResult<u64> {
        let mut update = Entity::update_many()
            .col_expr(Column::Sending, Expr::value(false))
            .filter(Column::Sending.eq(true));
        if let Some(campaign_id) = campaign_id {
            update = update.filter(Column::CampaignId.eq(campaign_id));
        }
        Ok(update.exec(&self.db).await?.rows_affected)
    }

    async fn claim_batch(&self, request: ClaimRequest) -> NewsletterResult<Vec<QueueItem>> {
        let txn = self.db.begin().await?;

        let mut query = Entity::find()
            .filter(Column::CampaignId.eq(request.campaign_id))
            .filter(Column::Sending.eq(false));
        if !request.include_failed {
            query = query.filter(Column::LastError.is_null());
        }
        query = match request.after {
            QueueCursor::Id(id) => query.filter(Column::Id.gt(id)).order_by_asc(Column::Id),
            QueueCursor::Guid(guid) => query
                .filter(Column::Guid.gt(guid))
                .order_by_asc(Column::Guid),
        };

        // Concurrent claimers skip rows locked by each other
        let models = query
            .limit(request.limit as u64)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await?;

        if models.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
        Entity::update_many()
            .col_expr(Column::Sending, Expr::value(true))
            .col_expr(Column::LastError, Expr::value(Option::<String>::None))
            .filter(Column::Id.is_in(ids))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        Ok(models
            .into_iter()
            .map(|model| {
                let mut item = QueueItem::from(model);
                item.sending = true;
                item.last_error = None;
                item
            })
            .collect())
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> NewsletterResult<()> {
        Entity::update_many()
            .col_expr(Column::Sending, Expr::value(false))
            .col_expr(Column::LastError, Expr::value(error))
            .col_expr(Column::LastAttempt, Expr::value(at))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_sent(&self, campaign_id: i64, ids: &[i64]) -> NewsletterResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Entity::delete_many()
            .filter(Column::CampaignId.eq(campaign_id))
            .filter(Column::Id.is_in(ids.iter().copied()))
            .filter(Column::Sending.eq(true))
            .filter(Column::LastError.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn pending_campaigns(&self, include_failed: bool) -> NewsletterResult<Vec<i64>> {
        let mut eligible = Entity::find()
            .select_only()
            .column(Column::CampaignId)
            .distinct()
            .filter(Column::Sending.eq(false));
        if !include_failed {
            eligible = eligible.filter(Column::LastError.is_null());
        }
        let eligible: Vec<i64> = eligible.into_tuple::<i64>().all(&self.db).await?;

        let busy: HashSet<i64> = Entity::find()
            .select_only()
            .column(Column::CampaignId)
            .distinct()
            .filter(Column::Sending.eq(true))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?
            .into_iter()
            .collect();

        let mut pending: Vec<i64> = eligible.into_iter().filter(|c| !busy.contains(c)).collect();
        pending.sort_unstable();
        Ok(pending)
    }

    async fn count(&self, campaign_id: i64) -> NewsletterResult<u64> {
        let count = Entity::find()
            .filter(Column::CampaignId.eq(campaign_id))
            .count(&self.db)
            .await?;
        Ok(count)
    }
}
