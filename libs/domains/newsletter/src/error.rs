//! Error types for the newsletter dispatch domain.

use thiserror::Error;

/// Result type for newsletter operations.
pub type NewsletterResult<T> = Result<T, NewsletterError>;

/// Errors raised while generating or draining a newsletter queue.
#[derive(Debug, Error)]
pub enum NewsletterError {
    /// The license allows fewer recipients than generation produced.
    #[error("Recipient limit exceeded: {count} recipients, license allows {limit}")]
    RecipientLimitExceeded { limit: usize, count: usize },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(i64),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(i64),

    #[error("A/B test not found for campaign {0}")]
    AbTestNotFound(i64),

    /// Queue or campaign storage failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The transport refused or failed to deliver a message.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sea_orm::DbErr> for NewsletterError {
    fn from(err: sea_orm::DbErr) -> Self {
        NewsletterError::Store(err.to_string())
    }
}

impl From<core_config::ConfigError> for NewsletterError {
    fn from(err: core_config::ConfigError) -> Self {
        NewsletterError::Config(err.to_string())
    }
}
