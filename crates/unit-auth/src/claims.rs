//! JWT claims for every token variant
//!
//! Three payload shapes are signed by the engine:
//! - [`TokenClaims`]: HS256 internal tokens (access, refresh, remember-me, unified)
//! - [`AuthorizationCodeClaims`]: RS256 authorization codes
//! - [`OAuthTokenClaims`]: RS256 access/refresh tokens handed to OAuth clients

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Standard claims with identity-service extensions.
///
/// # Example
///
/// ```rust
/// use unit_auth::claims::{TokenClaims, TokenType};
///
/// let claims = TokenClaims::new("u1", "u1@example.com", "user", chrono::Duration::hours(1))
///     .with_token_type(TokenType::RememberMe);
/// assert_eq!(claims.token_type, TokenType::RememberMe);
/// assert!(!claims.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    // Standard JWT claims (RFC 7519)
    /// Subject (central user ID)
    pub sub: String,

    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Audience (project key or token-exchange target)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,

    // Service claims
    /// Email, phone or username used at login
    pub identifier: String,

    /// Role snapshot at issuance
    pub role: String,

    /// Token variant
    pub token_type: TokenType,

    /// Requesting project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,

    /// User id inside the requesting project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_user_id: Option<String>,

    /// Session the token belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TokenClaims {
    /// Create access claims valid for `duration` from now.
    pub fn new(
        user_id: impl Into<String>,
        identifier: impl Into<String>,
        role: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id.into(),
            iss: String::new(),
            aud: None,
            exp: (now + duration).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            identifier: identifier.into(),
            role: role.into(),
            token_type: TokenType::Access,
            project_key: None,
            local_user_id: None,
            session_id: None,
        }
    }

    /// Set the token type.
    pub fn with_token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = token_type;
        self
    }

    /// Set the issuer.
    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = iss.into();
        self
    }

    /// Bind the token to an audience.
    pub fn with_audience(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    /// Embed the federation mapping for a project.
    pub fn with_project(mut self, project_key: Option<String>, local_user_id: Option<String>) -> Self {
        self.project_key = project_key;
        self.local_user_id = local_user_id;
        self
    }

    /// Set the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// Whether the token is expired at `now` (Unix seconds). A token is still
    /// valid during its `exp` second, as signature validation has no leeway
    /// and accepts it too.
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.exp
    }

    /// Seconds until expiry (negative once expired).
    pub fn expires_in(&self) -> i64 {
        self.exp - Utc::now().timestamp()
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Token type enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Access token (short-lived)
    Access,

    /// Refresh token (single use, rotated)
    Refresh,

    /// Remember-me token (longest lived)
    RememberMe,

    /// OAuth authorization code
    AuthorizationCode,
}

impl TokenType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::RememberMe => "remember_me",
            TokenType::AuthorizationCode => "authorization_code",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            "remember_me" => Some(TokenType::RememberMe),
            "authorization_code" => Some(TokenType::AuthorizationCode),
            _ => None,
        }
    }
}

impl Default for TokenType {
    fn default() -> Self {
        TokenType::Access
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PKCE challenge attached to an authorization request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PkceChallenge {
    /// The code challenge
    pub code_challenge: String,

    /// `S256` or `plain`
    pub code_challenge_method: String,
}

impl PkceChallenge {
    /// Create a challenge; an empty method means `plain` (RFC 7636 §4.3).
    pub fn new(code_challenge: impl Into<String>, method: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            code_challenge: code_challenge.into(),
            code_challenge_method: if method.is_empty() {
                "plain".to_string()
            } else {
                method
            },
        }
    }

    /// S256 challenge.
    pub fn s256(code_challenge: impl Into<String>) -> Self {
        Self::new(code_challenge, "S256")
    }
}

/// Claims of an RS256-signed authorization code.
///
/// The code is not stored anywhere; everything needed at exchange time
/// travels inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCodeClaims {
    /// Issuer
    pub iss: String,

    /// Subject (central user ID)
    pub sub: String,

    /// Client the code was issued to
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// Unique code id
    pub jti: String,

    /// Always [`TokenType::AuthorizationCode`]
    pub token_type: TokenType,

    /// Redirect URI the code must be exchanged with
    pub redirect_uri: String,

    /// Granted scope
    pub scope: String,

    /// PKCE challenge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE challenge method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Anti-CSRF state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Requesting application (double verification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// SSO session opened at authorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuthorizationCodeClaims {
    /// The embedded PKCE challenge, if any.
    pub fn pkce(&self) -> Option<PkceChallenge> {
        self.code_challenge
            .as_ref()
            .map(|c| PkceChallenge::new(c.clone(), self.code_challenge_method.clone().unwrap_or_default()))
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Claims of RS256 tokens issued by the OAuth token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokenClaims {
    /// Issuer
    pub iss: String,

    /// Subject; absent for `client_credentials` tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Client the token was issued to
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID
    pub jti: String,

    /// `access` or `refresh`
    pub token_type: TokenType,

    /// Granted scope
    pub scope: String,

    /// Login identifier of the subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Role snapshot of the subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Requesting application, carried over from the authorization code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl OAuthTokenClaims {
    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_creation() {
        let claims = TokenClaims::new("u1", "u1@example.com", "user", Duration::hours(1));

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.identifier, "u1@example.com");
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.iat, claims.nbf);
        assert!(claims.exp > claims.iat);
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_unique_jti() {
        let a = TokenClaims::new("u1", "id", "user", Duration::hours(1));
        let b = TokenClaims::new("u1", "id", "user", Duration::hours(1));
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_claims_expiration() {
        let mut claims = TokenClaims::new("u1", "id", "user", Duration::hours(1));
        claims.exp = Utc::now().timestamp() - 3600;

        assert!(claims.is_expired());
        assert!(claims.expires_in() < 0);
    }

    #[test]
    fn test_expiry_boundary_second() {
        let claims = TokenClaims::new("u1", "id", "user", Duration::hours(1));

        assert!(!claims.is_expired_at(claims.exp - 1));
        assert!(!claims.is_expired_at(claims.exp));
        assert!(claims.is_expired_at(claims.exp + 1));
    }

    #[test]
    fn test_optional_fields_skipped() {
        let claims = TokenClaims::new("u1", "id", "user", Duration::hours(1));
        let json = serde_json::to_value(&claims).unwrap();

        assert!(json.get("project_key").is_none());
        assert!(json.get("aud").is_none());
        assert_eq!(json["token_type"], "access");
    }

    #[test]
    fn test_token_type_strings() {
        assert_eq!(TokenType::RememberMe.as_str(), "remember_me");
        assert_eq!(TokenType::parse("authorization_code"), Some(TokenType::AuthorizationCode));
        assert_eq!(TokenType::parse("bogus"), None);
        assert_eq!(
            serde_json::to_value(TokenType::RememberMe).unwrap(),
            "remember_me"
        );
    }

    #[test]
    fn test_pkce_default_method() {
        assert_eq!(PkceChallenge::new("abc", "").code_challenge_method, "plain");
        assert_eq!(PkceChallenge::s256("abc").code_challenge_method, "S256");
    }
}
