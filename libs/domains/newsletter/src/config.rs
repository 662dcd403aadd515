use core_config::{env_parse, ConfigError, FromEnv};

/// Tuning knobs for generation and draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Rows claimed per drain iteration.
    pub batch_size: usize,
    /// Contact ids resolved per directory lookup.
    pub contact_chunk_size: usize,
    /// Rows per page of the campaign recipient view.
    pub campaign_page_size: usize,
    /// Rows per bulk insert statement.
    pub insert_chunk_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            contact_chunk_size: 10_000,
            campaign_page_size: 100_000,
            insert_chunk_size: 1_000,
        }
    }
}

impl FromEnv for DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_parse("NEWSLETTER_BATCH_SIZE", defaults.batch_size)?,
            contact_chunk_size: env_parse(
                "NEWSLETTER_CONTACT_CHUNK_SIZE",
                defaults.contact_chunk_size,
            )?,
            campaign_page_size: env_parse(
                "NEWSLETTER_CAMPAIGN_PAGE_SIZE",
                defaults.campaign_page_size,
            )?,
            insert_chunk_size: env_parse(
                "NEWSLETTER_INSERT_CHUNK_SIZE",
                defaults.insert_chunk_size,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl DispatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("NEWSLETTER_BATCH_SIZE", self.batch_size),
            ("NEWSLETTER_CONTACT_CHUNK_SIZE", self.contact_chunk_size),
            ("NEWSLETTER_CAMPAIGN_PAGE_SIZE", self.campaign_page_size),
            ("NEWSLETTER_INSERT_CHUNK_SIZE", self.insert_chunk_size),
        ];
        match sizes.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(ConfigError::ParseError {
                key: (*key).to_string(),
                details: "must be greater than zero".to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}
