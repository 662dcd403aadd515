use async_trait::async_trait;

use crate::models::Site;

/// How many recipients a site's license allows per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientCap {
    Unlimited,
    Limited(usize),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LicenseGate: Send + Sync {
    async fn is_site_licensed(&self, site: &Site) -> bool;

    async fn recipient_cap(&self, site: &Site) -> RecipientCap;
}

/// License with a fixed answer for every site.
#[derive(Debug, Clone, Copy)]
pub struct StaticLicense {
    licensed: bool,
    cap: RecipientCap,
}

impl StaticLicense {
    pub fn unlimited() -> Self {
        Self {
            licensed: true,
            cap: RecipientCap::Unlimited,
        }
    }

    pub fn capped(limit: usize) -> Self {
        Self {
            licensed: true,
            cap: RecipientCap::Limited(limit),
        }
    }

    pub fn unlicensed() -> Self {
        Self {
            licensed: false,
            cap: RecipientCap::Limited(0),
        }
    }
}

#[async_trait]
impl LicenseGate for StaticLicense {
    async fn is_site_licensed(&self, _site: &Site) -> bool {
        self.licensed
    }

    async fn recipient_cap(&self, _site: &Site) -> RecipientCap {
        self.cap
    }
}
