use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;

use crate::models::{NewQueueItem, QueueItem};

/// Sea-ORM Entity for the newsletter email queue table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "newsletter_email_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub guid: Uuid,
    pub campaign_id: i64,
    pub subscriber_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub site_id: i64,
    pub address: String,
    pub sending: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for QueueItem {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            guid: model.guid,
            campaign_id: model.campaign_id,
            subscriber_id: model.subscriber_id,
            contact_id: model.contact_id,
            site_id: model.site_id,
            address: model.address,
            sending: model.sending,
            last_error: model.last_error,
            last_attempt: model.last_attempt.map(Into::into),
            created_at: model.created_at.into(),
        }
    }
}

// Id is left to the sequence
impl From<NewQueueItem> for ActiveModel {
    fn from(item: NewQueueItem) -> Self {
        ActiveModel {
            id: NotSet,
            guid: Set(item.guid),
            campaign_id: Set(item.campaign_id),
            subscriber_id: Set(item.subscriber_id),
            contact_id: Set(item.contact_id),
            site_id: Set(item.site_id),
            address: Set(item.address),
            sending: Set(item.sending),
            last_error: Set(None),
            last_attempt: Set(None),
            created_at: Set(chrono::Utc::now().into()),
        }
    }
}
