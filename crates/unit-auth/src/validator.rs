//! Token validation
//!
//! [`TokenValidator`] verifies signature, expiry (no leeway) and issuer of
//! every token variant, and optionally the declared type and the blacklist.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

use crate::claims::{AuthorizationCodeClaims, OAuthTokenClaims, TokenClaims, TokenType};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::keys::KeyRing;
use crate::session::SessionRegistry;

/// Verifies tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: Arc<KeyRing>,
    issuer: String,
    oauth_issuer: String,
    default_window: Duration,
    sessions: Option<SessionRegistry>,
}

impl TokenValidator {
    /// Create a validator over a key ring.
    pub fn new(keys: Arc<KeyRing>, config: &AuthConfig) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            oauth_issuer: config.oauth_issuer.clone(),
            default_window: config.expiring_soon_window,
            sessions: None,
        }
    }

    /// Consult the session registry's blacklist in the `*_active` checks.
    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = Some(sessions);
        self
    }

    fn validation(alg: Algorithm, issuer: &str) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = 0;
        validation.validate_nbf = true;
        // Audience is checked by callers that care about it.
        validation.validate_aud = false;
        validation.set_issuer(&[issuer]);
        validation
    }

    /// Verify signature and expiry of an internal token. The type is not checked.
    pub fn validate(&self, token: &str) -> AuthResult<TokenClaims> {
        self.keys
            .verify_hs256(token, &Self::validation(Algorithm::HS256, &self.issuer))
    }

    /// Verify a token and require its type to be `expected`.
    pub fn validate_type(&self, token: &str, expected: TokenType) -> AuthResult<TokenClaims> {
        let claims = self.validate(token)?;
        ensure_type(expected, claims.token_type)?;
        Ok(claims)
    }

    /// Verify a token bound to `audience` (token exchange).
    pub fn validate_for_audience(&self, token: &str, audience: &str) -> AuthResult<TokenClaims> {
        let claims = self.validate_type(token, TokenType::Access)?;
        if claims.aud.as_deref() != Some(audience) {
            debug!(expected = audience, "Token audience mismatch");
            return Err(AuthError::Malformed);
        }
        Ok(claims)
    }

    /// Whether the token expires within `window` (the configured default,
    /// one hour, when `None`).
    ///
    /// Used to drive silent refresh. Invalid tokens are an error, not `true`.
    pub fn is_expiring_soon(&self, token: &str, window: Option<Duration>) -> AuthResult<bool> {
        let claims = self.validate(token)?;
        let window = window.unwrap_or(self.default_window);
        Ok(claims.exp - Utc::now().timestamp() <= window.num_seconds())
    }

    /// Verify a token and reject it if its `jti` was blacklisted.
    pub async fn validate_active(&self, token: &str, expected: Option<TokenType>) -> AuthResult<TokenClaims> {
        let claims = match expected {
            Some(expected) => self.validate_type(token, expected)?,
            None => self.validate(token)?,
        };
        self.ensure_not_blacklisted(&claims.jti).await?;
        Ok(claims)
    }

    /// Verify an RS256 authorization code.
    pub fn validate_authorization_code(&self, code: &str) -> AuthResult<AuthorizationCodeClaims> {
        let claims: AuthorizationCodeClaims = self
            .keys
            .verify_rs256(code, &Self::validation(Algorithm::RS256, &self.oauth_issuer))?;
        ensure_type(TokenType::AuthorizationCode, claims.token_type)?;
        Ok(claims)
    }

    /// Verify an RS256 OAuth token, optionally requiring its type.
    pub fn validate_oauth_token(&self, token: &str, expected: Option<TokenType>) -> AuthResult<OAuthTokenClaims> {
        let claims: OAuthTokenClaims = self
            .keys
            .verify_rs256(token, &Self::validation(Algorithm::RS256, &self.oauth_issuer))?;
        if let Some(expected) = expected {
            ensure_type(expected, claims.token_type)?;
        }
        Ok(claims)
    }

    /// [`TokenValidator::validate_oauth_token`] plus the blacklist check.
    pub async fn validate_oauth_active(
        &self,
        token: &str,
        expected: Option<TokenType>,
    ) -> AuthResult<OAuthTokenClaims> {
        let claims = self.validate_oauth_token(token, expected)?;
        self.ensure_not_blacklisted(&claims.jti).await?;
        Ok(claims)
    }

    async fn ensure_not_blacklisted(&self, jti: &str) -> AuthResult<()> {
        if let Some(sessions) = &self.sessions {
            if sessions.is_blacklisted(jti).await? {
                return Err(AuthError::Blacklisted);
            }
        }
        Ok(())
    }
}

fn ensure_type(expected: TokenType, actual: TokenType) -> AuthResult<()> {
    if expected != actual {
        return Err(AuthError::WrongTokenType { expected, actual });
    }
    Ok(())
}
