use crate::{env_parse, env_required, ConfigError, FromEnv};

/// Postgres connection settings for the queue store
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            min_connections: 2,
        }
    }
}

impl FromEnv for DatabaseConfig {
    /// Requires DATABASE_URL; pool sizes are optional
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(env_required("DATABASE_URL")?);
        Ok(Self {
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS", defaults.min_connections)?,
            ..defaults
        })
    }
}
