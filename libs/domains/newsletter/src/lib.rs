//! Newsletter Dispatch Domain
//!
//! Generates the recipient queue of a newsletter issue or email campaign and
//! drains it through a single-flight sender.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ NewsletterSvc   │  ← generate_queue / start_drain triggers
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ QueueGenerator  │  ← retriever / campaign generator, cap, dedup
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   QueueStore    │  ← newsletter_email_queue (memory or Postgres)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  QueueSender    │  ← one drain at a time, batch claim + settle
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Transport     │  ← renders and delivers each row
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_newsletter::{DispatchConfig, DispatchContext, NewsletterService};
//!
//! let service = NewsletterService::new(ctx, DispatchConfig::from_env()?);
//! service.generate_queue(campaign_id).await?;
//! if let Some(handle) = service.start_drain(false, Some(campaign_id)) {
//!     let report = handle.await?;
//! }
//! ```

pub mod blocker;
pub mod campaign_generator;
pub mod campaigns;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod generator;
pub mod license;
pub mod models;
pub mod queue;
pub mod retriever;
pub mod sender;
pub mod service;
pub mod settings;
pub mod transport;
pub mod winner;

// Re-export commonly used types
pub use blocker::{
    EmailAddressBlocker, InMemoryUnsubscriptions, OnDemandBlocker, PreloadedBlocker,
    UnsubscriptionSource,
};
pub use campaign_generator::CampaignEmailGenerator;
pub use campaigns::{CampaignRepository, InMemoryCampaignRepository};
pub use config::DispatchConfig;
pub use context::DispatchContext;
pub use directory::{InMemoryDirectory, SubscriberDirectory};
pub use error::{NewsletterError, NewsletterResult};
pub use generator::{GenerationOutcome, QueueGenerator, SkipReason};
pub use license::{LicenseGate, RecipientCap, StaticLicense};
pub use models::{
    AbTest, BounceSettings, Campaign, CampaignKind, CampaignStatus, Contact, NewQueueItem,
    QueueItem, RecipientCandidate, Site, Subscriber, SubscriberKind,
};
pub use queue::{
    ClaimRequest, CursorKind, InMemoryQueueStore, PgQueueStore, QueueCursor, QueueStore,
};
pub use retriever::RecipientCandidateRetriever;
pub use sender::{DrainOutcome, DrainReport, QueueSender};
pub use service::NewsletterService;
pub use settings::{SendingSettings, StaticSettings};
pub use transport::{
    BasicRenderer, MessageRenderer, OutgoingEmail, RecordingTransport, SentEmail, Transport,
};
pub use winner::{RecordingWinnerScheduler, WinnerSelectionScheduler};
