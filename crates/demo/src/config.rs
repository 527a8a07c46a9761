//! Demo configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `COOKIE_SECRET`, `CHS_WEB_URL` - see [`SecurityConfig`]
//!
//! ## Optional
//! - `DEMO_HOST` - Bind address (default: 127.0.0.1)
//! - `DEMO_PORT` - Listen port (default: 3000)
//! - `DEMO_RETURN_URL` - Where the sign-in service returns to (default: `http://localhost:3000`)
//! - `DEMO_COMPANY_NUMBER` - Company guarding `/company` (default: 12345678)
//! - `DATABASE_URL` - `PostgreSQL` connection string; sessions are kept in memory without it
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use web_security_axum::{ConfigError, SecurityConfig};

/// Demo application configuration.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Settings shared with the middleware
    pub security: SecurityConfig,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Return URL handed to the sign-in service
    pub return_url: String,
    /// Company guarding the company page
    pub company_number: String,
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl DemoConfig {
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

        let security = SecurityConfig::from_env()?;
        let host = get_env_or_default("DEMO_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("DEMO_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("DEMO_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("DEMO_PORT".to_string(), e.to_string()))?;

        Ok(Self {
            security,
            host,
            port,
            return_url: get_env_or_default("DEMO_RETURN_URL", "http://localhost:3000"),
            company_number: get_env_or_default("DEMO_COMPANY_NUMBER", "12345678"),
            database_url: get_optional_env("DATABASE_URL").map(SecretString::from),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
