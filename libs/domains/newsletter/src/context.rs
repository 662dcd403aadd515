use std::sync::Arc;

use crate::blocker::UnsubscriptionSource;
use crate::campaigns::CampaignRepository;
use crate::directory::SubscriberDirectory;
use crate::license::LicenseGate;
use crate::queue::QueueStore;
use crate::settings::SendingSettings;
use crate::transport::{MessageRenderer, Transport};
use crate::winner::WinnerSelectionScheduler;

/// External collaborators shared by generation and draining.
#[derive(Clone)]
pub struct DispatchContext {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub directory: Arc<dyn SubscriberDirectory>,
    pub queue: Arc<dyn QueueStore>,
    pub unsubscriptions: Arc<dyn UnsubscriptionSource>,
    pub settings: Arc<dyn SendingSettings>,
    pub license: Arc<dyn LicenseGate>,
    pub winner: Arc<dyn WinnerSelectionScheduler>,
    pub renderer: Arc<dyn MessageRenderer>,
    pub transport: Arc<dyn Transport>,
}

impl DispatchContext {
    /// Both site switches needed for a mailout.
    pub fn sending_enabled(&self, site_id: i64) -> bool {
        self.settings.emails_enabled(site_id) && self.settings.generate_newsletters(site_id)
    }
}
