//! Configuration loading and representation.
//!
//! Everything comes from environment variables. `from_lookup` takes the
//! lookup as a closure so tests can feed a map instead of touching the
//! process environment.

use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:/tmp/affwriter.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `DATABASE_URL`, falling back to `DB_DSN`.
    pub url: String,
    /// `DB_MAX_CONNECTIONS`
    pub max_connections: u32,
    /// `DB_BUSY_TIMEOUT_MS`
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::with_url(DEFAULT_DATABASE_URL)
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let url = get("DATABASE_URL")
            .or_else(|| get("DB_DSN"))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(value) => parse_positive::<u32>("DB_MAX_CONNECTIONS", value)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let busy_timeout_ms = match get("DB_BUSY_TIMEOUT_MS") {
            Some(value) => parse_positive::<u64>("DB_BUSY_TIMEOUT_MS", value)?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            url,
            max_connections,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}

fn parse_positive<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}
