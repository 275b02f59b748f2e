//! Token engine configuration.
//!
//! Signing material, issuers and per-variant lifetimes. Configuration is
//! loaded from environment variables with defaults suitable for local
//! development.

use chrono::Duration;
use thiserror::Error;

use crate::error::AuthError;

/// Secret used when `JWT_SECRET` is not set. Rejected by
/// [`AuthConfig::validate_for_production`].
pub const DEVELOPMENT_SECRET: &str = "unit-auth-development-secret-change-me";

/// Minimum HMAC secret length accepted in production.
pub const MIN_SECRET_LEN: usize = 32;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl From<ConfigError> for AuthError {
    fn from(e: ConfigError) -> Self {
        AuthError::ConfigError(e.to_string())
    }
}

/// Configuration for issuing and validating tokens.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret for internal HS256 tokens
    pub jwt_secret: String,

    /// `iss` of internal tokens
    pub issuer: String,

    /// `iss` of authorization codes and OAuth tokens; also the base of the
    /// discovery document
    pub oauth_issuer: String,

    /// RSA private key (PKCS#8 or PKCS#1 PEM); generated at startup when absent
    pub rsa_private_key: Option<String>,

    /// RSA public key (SPKI PEM)
    pub rsa_public_key: Option<String>,

    /// Key id for the configured RSA key; derived from the public key when absent
    pub rsa_key_id: Option<String>,

    /// Internal access / unified token lifetime
    pub access_token_ttl: Duration,

    /// Internal refresh token lifetime
    pub refresh_token_ttl: Duration,

    /// Remember-me token lifetime
    pub remember_me_ttl: Duration,

    /// Authorization code lifetime
    pub authorization_code_ttl: Duration,

    /// OAuth access token lifetime
    pub oauth_access_token_ttl: Duration,

    /// OAuth refresh token lifetime
    pub oauth_refresh_token_ttl: Duration,

    /// Default window for `is_expiring_soon`
    pub expiring_soon_window: Duration,

    /// Record consumed authorization codes and reject replays
    pub enforce_single_use_codes: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("oauth_issuer", &self.oauth_issuer)
            .field("rsa_private_key", &self.rsa_private_key.as_ref().map(|_| "[REDACTED]"))
            .field("rsa_key_id", &self.rsa_key_id)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("remember_me_ttl", &self.remember_me_ttl)
            .field("authorization_code_ttl", &self.authorization_code_ttl)
            .field("enforce_single_use_codes", &self.enforce_single_use_codes)
            .finish()
    }
}

impl Default for AuthConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            jwt_secret: DEVELOPMENT_SECRET.to_string(),
            issuer: "unit-auth".to_string(),
            oauth_issuer: "http://localhost:8080".to_string(),
            rsa_private_key: None,
            rsa_public_key: None,
            rsa_key_id: None,
            access_token_ttl: Duration::hours(1),
            refresh_token_ttl: Duration::hours(24),
            remember_me_ttl: Duration::hours(720),
            authorization_code_ttl: Duration::minutes(10),
            oauth_access_token_ttl: Duration::hours(1),
            oauth_refresh_token_ttl: Duration::hours(24),
            expiring_soon_window: Duration::hours(1),
            enforce_single_use_codes: true,
        }
    }
}

impl AuthConfig {
    /// Create a configuration with the given HMAC secret and defaults otherwise.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `JWT_SECRET`: HMAC secret for internal tokens
    /// - `JWT_ISSUER`: issuer of internal tokens (default: unit-auth)
    /// - `JWT_EXPIRATION`: access token lifetime in hours (default: 1)
    /// - `JWT_REFRESH_EXPIRATION`: refresh token lifetime in hours (default: 24)
    /// - `JWT_REMEMBER_ME_EXPIRATION`: remember-me lifetime in hours (default: 720)
    /// - `OAUTH_ISSUER`: OAuth issuer URL (default: http://localhost:8080)
    /// - `RSA_PRIVATE_KEY` / `RSA_PUBLIC_KEY`: PEM encoded signing key pair
    /// - `RSA_KEY_ID`: key id published in the JWKS
    /// - `AUTHORIZATION_CODE_TTL_SECS`: code lifetime (default: 600)
    /// - `OAUTH_ACCESS_TOKEN_TTL_SECS`: OAuth access lifetime (default: 3600)
    /// - `OAUTH_REFRESH_TOKEN_TTL_SECS`: OAuth refresh lifetime (default: 86400)
    /// - `ENFORCE_SINGLE_USE_CODES`: reject replayed codes (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(default.jwt_secret),
            issuer: std::env::var("JWT_ISSUER").unwrap_or(default.issuer),
            oauth_issuer: std::env::var("OAUTH_ISSUER").unwrap_or(default.oauth_issuer),
            rsa_private_key: std::env::var("RSA_PRIVATE_KEY").ok(),
            rsa_public_key: std::env::var("RSA_PUBLIC_KEY").ok(),
            rsa_key_id: std::env::var("RSA_KEY_ID").ok(),
            access_token_ttl: env_hours("JWT_EXPIRATION").unwrap_or(default.access_token_ttl),
            refresh_token_ttl: env_hours("JWT_REFRESH_EXPIRATION")
                .unwrap_or(default.refresh_token_ttl),
            remember_me_ttl: env_hours("JWT_REMEMBER_ME_EXPIRATION")
                .unwrap_or(default.remember_me_ttl),
            authorization_code_ttl: env_secs("AUTHORIZATION_CODE_TTL_SECS")
                .unwrap_or(default.authorization_code_ttl),
            oauth_access_token_ttl: env_secs("OAUTH_ACCESS_TOKEN_TTL_SECS")
                .unwrap_or(default.oauth_access_token_ttl),
            oauth_refresh_token_ttl: env_secs("OAUTH_REFRESH_TOKEN_TTL_SECS")
                .unwrap_or(default.oauth_refresh_token_ttl),
            expiring_soon_window: default.expiring_soon_window,
            enforce_single_use_codes: std::env::var("ENFORCE_SINGLE_USE_CODES")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.enforce_single_use_codes),
        }
    }

    /// Validate that the configuration is safe for production.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.jwt_secret == DEVELOPMENT_SECRET {
            return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
        }
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                key: "JWT_SECRET".to_string(),
                message: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        if self.rsa_private_key.is_some() != self.rsa_public_key.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "RSA_PRIVATE_KEY".to_string(),
                message: "private and public key must be configured together".to_string(),
            });
        }
        if self.access_token_ttl <= Duration::zero() || self.authorization_code_ttl <= Duration::zero() {
            return Err(ConfigError::InvalidValue {
                key: "JWT_EXPIRATION".to_string(),
                message: "token lifetimes must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn env_hours(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|h| *h > 0)
        .map(Duration::hours)
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::seconds)
}
