//! Security configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `COOKIE_SECRET` - Secret mixed into client signatures (min 32 chars, not a placeholder)
//! - `CHS_WEB_URL` - Base URL of the sign-in service
//!
//! ## Optional
//! - `CSRF_ENABLED` - Enable CSRF protection (default: true)
//! - `SESSION_COOKIE_NAME` - Session cookie name (default: `_SID`)

use secrecy::SecretString;
use thiserror::Error;

use crate::session::DEFAULT_SESSION_COOKIE_NAME;

const MIN_COOKIE_SECRET_LENGTH: usize = 32;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Settings shared by the auth and CSRF middleware.
///
/// Implements `Debug` manually to redact the cookie secret.
#[derive(Clone)]
pub struct SecurityConfig {
    /// Secret mixed into client signatures
    pub cookie_secret: SecretString,
    /// Base URL of the sign-in service
    pub chs_web_url: String,
    /// Whether CSRF protection is enabled
    pub csrf_enabled: bool,
    /// Name of the session cookie
    pub session_cookie_name: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("cookie_secret", &"[REDACTED]")
            .field("chs_web_url", &self.chs_web_url)
            .field("csrf_enabled", &self.csrf_enabled)
            .field("session_cookie_name", &self.session_cookie_name)
            .finish()
    }
}

impl SecurityConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// or if the cookie secret fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`SecurityConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let cookie_secret = env.required("COOKIE_SECRET")?;
        validate_cookie_secret(&cookie_secret, "COOKIE_SECRET")?;

        let chs_web_url = env.required("CHS_WEB_URL")?;
        if chs_web_url.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "CHS_WEB_URL".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let csrf_enabled = parse_bool("CSRF_ENABLED", &env.or_default("CSRF_ENABLED", "true"))?;
        let session_cookie_name = env.or_default("SESSION_COOKIE_NAME", DEFAULT_SESSION_COOKIE_NAME);

        Ok(Self {
            cookie_secret: SecretString::from(cookie_secret),
            chs_web_url,
            csrf_enabled,
            session_cookie_name,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Get a required environment variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get an environment variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got '{other}'"),
        )),
    }
}

/// Validate length and reject placeholder values.
fn validate_cookie_secret(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_COOKIE_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_COOKIE_SECRET_LENGTH,
                secret.len()
            ),
        ));
    }

    let lower = secret.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    Ok(())
}
