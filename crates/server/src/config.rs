//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTKEEPER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `CARTKEEPER_HOST` - Bind address (default: 127.0.0.1)
//! - `CARTKEEPER_PORT` - Listen port (default: 3000)
//! - `CARTKEEPER_CACHE_CAPACITY` - Maximum cached cart snapshots (default: 10000)
//! - `OUTBOX_POLL_INTERVAL_MS` - Outbox poll interval (default: 1000)
//! - `OUTBOX_CLAIM_LEASE_SECS` - How long a claimed event stays reserved (default: 30)
//! - `SETTLEMENT_ACCOUNT_ID` - Client credited by payments (default: 1)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use cartkeeper_core::ClientId;

use crate::cache::CacheConfig;
use crate::outbox::OutboxConfig;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    pub cache: CacheConfig,
    pub outbox: OutboxConfig,
    /// Client credited with every settled payment
    pub settlement_account: ClientId,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CARTKEEPER_DATABASE_URL")?;
        let host: IpAddr = parse_env(
            "CARTKEEPER_HOST",
            &get_env_or_default("CARTKEEPER_HOST", "127.0.0.1"),
        )?;
        let port: u16 = parse_env(
            "CARTKEEPER_PORT",
            &get_env_or_default("CARTKEEPER_PORT", "3000"),
        )?;

        let cache = CacheConfig {
            max_capacity: parse_env(
                "CARTKEEPER_CACHE_CAPACITY",
                &get_env_or_default("CARTKEEPER_CACHE_CAPACITY", "10000"),
            )?,
        };

        let poll_ms: u64 = parse_env(
            "OUTBOX_POLL_INTERVAL_MS",
            &get_env_or_default("OUTBOX_POLL_INTERVAL_MS", "1000"),
        )?;
        if poll_ms == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "OUTBOX_POLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let lease_secs: u64 = parse_env(
            "OUTBOX_CLAIM_LEASE_SECS",
            &get_env_or_default("OUTBOX_CLAIM_LEASE_SECS", "30"),
        )?;
        let outbox = OutboxConfig {
            poll_interval: Duration::from_millis(poll_ms),
            claim_lease: Duration::from_secs(lease_secs),
        };

        let settlement_account = parse_client_id(
            "SETTLEMENT_ACCOUNT_ID",
            &get_env_or_default("SETTLEMENT_ACCOUNT_ID", "1"),
        )?;

        Ok(Self {
            database_url,
            host,
            port,
            cache,
            outbox,
            settlement_account,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither variable is set.
pub fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a raw variable value, naming the variable on failure.
fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_client_id(key: &str, raw: &str) -> Result<ClientId, ConfigError> {
    let id = ClientId::new(parse_env(key, raw)?);
    if !id.is_valid() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be a positive client id".to_string(),
        ));
    }
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_valid() {
        let port: u16 = parse_env("CARTKEEPER_PORT", "8080").unwrap();
        assert_eq!(port, 8080);

        let host: IpAddr = parse_env("CARTKEEPER_HOST", " 0.0.0.0 ").unwrap();
        assert_eq!(host.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_parse_env_invalid_names_variable() {
        let err = parse_env::<u16>("CARTKEEPER_PORT", "http").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "CARTKEEPER_PORT"));
    }

    #[test]
    fn test_parse_client_id_rejects_non_positive() {
        assert_eq!(parse_client_id("SETTLEMENT_ACCOUNT_ID", "3").unwrap(), ClientId::new(3));
        assert!(parse_client_id("SETTLEMENT_ACCOUNT_ID", "0").is_err());
        assert!(parse_client_id("SETTLEMENT_ACCOUNT_ID", "-4").is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            cache: CacheConfig::default(),
            outbox: OutboxConfig::default(),
            settlement_account: ClientId::new(1),
            sentry_dsn: None,
            sentry_environment: None,
        };
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
    }
}
