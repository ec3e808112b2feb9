//! Server configuration parsed from environment variables.
//!
//! Required:
//! - `DATABASE_URL`: external data service (Postgres) used for access checks
//! - `AUTH_URL`: base URL of the external identity provider
//!
//! Optional:
//! - `PORT`: default 3000
//! - `DB_MAX_CONNECTIONS`: default 5
//! - `AUTH_API_KEY`: sent as the `apikey` header on token introspection
//! - `AUTH_TIMEOUT_SECS`: default 10
//! - `WS_OUTBOUND_QUEUE`: per-connection outbound queue capacity, default 256
//! - `EVENTS_INGEST_KEY`: enables `POST /api/boards/{id}/events` when set

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WS_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub auth_url: String,
    pub auth_api_key: Option<String>,
    pub auth_timeout: Duration,
    pub outbound_queue: usize,
    pub ingest_key: Option<String>,
}

impl ServerConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let optional = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let outbound_queue = parse_or(&lookup, "WS_OUTBOUND_QUEUE", DEFAULT_WS_OUTBOUND_QUEUE)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid { var: "WS_OUTBOUND_QUEUE", value: "0".into() });
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            auth_url: required("AUTH_URL")?.trim_end_matches('/').to_owned(),
            auth_api_key: optional("AUTH_API_KEY"),
            auth_timeout: Duration::from_secs(parse_or(&lookup, "AUTH_TIMEOUT_SECS", DEFAULT_AUTH_TIMEOUT_SECS)?),
            outbound_queue,
            ingest_key: optional("EVENTS_INGEST_KEY"),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
