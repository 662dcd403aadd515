use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::models::BounceSettings;

/// Per-site sending switches read by generation and the drain loop.
#[cfg_attr(test, mockall::automock)]
pub trait SendingSettings: Send + Sync {
    /// Master switch for outgoing email on the site.
    fn emails_enabled(&self, site_id: i64) -> bool;

    /// Whether newsletter mailouts may run on the site.
    fn generate_newsletters(&self, site_id: i64) -> bool;

    fn bounce_settings(&self, site_id: i64) -> BounceSettings;
}

/// Site-independent settings that can be flipped at runtime.
///
/// Callers that flip a switch while a drain is running should follow up
/// with `QueueSender::notify_setting_changed`.
#[derive(Debug)]
pub struct StaticSettings {
    emails_enabled: AtomicBool,
    generate_newsletters: AtomicBool,
    monitor_bounces: AtomicBool,
    bounce_limit: AtomicU32,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            emails_enabled: AtomicBool::new(true),
            generate_newsletters: AtomicBool::new(true),
            monitor_bounces: AtomicBool::new(false),
            bounce_limit: AtomicU32::new(0),
        }
    }
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_emails_enabled(&self, enabled: bool) {
        self.emails_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_generate_newsletters(&self, enabled: bool) {
        self.generate_newsletters.store(enabled, Ordering::SeqCst);
    }

    pub fn set_bounce_settings(&self, settings: BounceSettings) {
        self.monitor_bounces
            .store(settings.monitor_bounces, Ordering::SeqCst);
        self.bounce_limit.store(settings.bounce_limit, Ordering::SeqCst);
    }
}

impl SendingSettings for StaticSettings {
    fn emails_enabled(&self, _site_id: i64) -> bool {
        self.emails_enabled.load(Ordering::SeqCst)
    }

    fn generate_newsletters(&self, _site_id: i64) -> bool {
        self.generate_newsletters.load(Ordering::SeqCst)
    }

    fn bounce_settings(&self, _site_id: i64) -> BounceSettings {
        BounceSettings {
            monitor_bounces: self.monitor_bounces.load(Ordering::SeqCst),
            bounce_limit: self.bounce_limit.load(Ordering::SeqCst),
        }
    }
}
