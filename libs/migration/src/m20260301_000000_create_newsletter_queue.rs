use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NewsletterEmailQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::Guid)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::CampaignId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::SubscriberId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::ContactId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::SiteId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::Address)
                            .string_len(254)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NewsletterEmailQueue::Sending)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(text_null(NewsletterEmailQueue::LastError))
                    .col(timestamp_with_time_zone_null(
                        NewsletterEmailQueue::LastAttempt,
                    ))
                    .col(
                        timestamp_with_time_zone(NewsletterEmailQueue::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Plain drains walk by id, variant drains by guid
        manager
            .create_index(
                Index::create()
                    .name("idx_newsletter_email_queue_campaign_id")
                    .table(NewsletterEmailQueue::Table)
                    .col(NewsletterEmailQueue::CampaignId)
                    .col(NewsletterEmailQueue::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_newsletter_email_queue_campaign_guid")
                    .table(NewsletterEmailQueue::Table)
                    .col(NewsletterEmailQueue::CampaignId)
                    .col(NewsletterEmailQueue::Guid)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_newsletter_email_queue_sending")
                    .table(NewsletterEmailQueue::Table)
                    .col(NewsletterEmailQueue::CampaignId)
                    .col(NewsletterEmailQueue::Sending)
                    .to_owned(),
            )
            .await?;

        // Duplicate removal joins on the lower-cased address
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_newsletter_email_queue_campaign_address \
                 ON newsletter_email_queue (campaign_id, lower(address))",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(NewsletterEmailQueue::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum NewsletterEmailQueue {
    Table,
    Id,
    Guid,
    CampaignId,
    SubscriberId,
    ContactId,
    SiteId,
    Address,
    Sending,
    LastError,
    LastAttempt,
    CreatedAt,
}
