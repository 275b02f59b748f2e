//! Token issuance
//!
//! [`TokenIssuer`] mints every token variant and owns the expiry policy for
//! each. Internal tokens are HS256; authorization codes and OAuth tokens are
//! RS256 so third parties can verify them against the published JWKS.
//!
//! Issuance is pure CPU work: nothing here touches a store.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::claims::{AuthorizationCodeClaims, OAuthTokenClaims, PkceChallenge, TokenClaims, TokenType};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::keys::KeyRing;

/// Everything embedded in an authorization code.
#[derive(Debug, Clone, Default)]
pub struct CodeGrant {
    /// Authenticated user
    pub user_id: String,

    /// Client the code is issued to
    pub client_id: String,

    /// Redirect URI the code must be redeemed with
    pub redirect_uri: String,

    /// Granted scope
    pub scope: String,

    /// PKCE challenge, if the client sent one
    pub pkce: Option<PkceChallenge>,

    /// Anti-CSRF state, if the client sent one
    pub state: Option<String>,

    /// Requesting application, if the client sent one
    pub app_id: Option<String>,

    /// SSO session the code belongs to
    pub session_id: Option<String>,
}

/// Subject of an OAuth token.
#[derive(Debug, Clone)]
pub struct OAuthSubject {
    /// Central user id
    pub user_id: String,

    /// Login identifier
    pub identifier: String,

    /// Role snapshot
    pub role: String,
}

/// Parameters of an OAuth token issuance.
#[derive(Debug, Clone)]
pub struct OAuthGrant {
    /// Client the tokens are issued to
    pub client_id: String,

    /// Granted scope
    pub scope: String,

    /// `None` for machine-to-machine tokens
    pub subject: Option<OAuthSubject>,

    /// Application carried over from the authorization code
    pub app_id: Option<String>,
}

/// Tokens minted for an OAuth grant.
#[derive(Debug, Clone)]
pub struct IssuedOAuthTokens {
    /// Signed access token
    pub access_token: String,

    /// Claims of the access token
    pub access_claims: OAuthTokenClaims,

    /// Signed refresh token, when requested
    pub refresh_token: Option<String>,

    /// Claims of the refresh token
    pub refresh_claims: Option<OAuthTokenClaims>,

    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Token pair containing access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,

    /// Refresh token (long-lived)
    pub refresh_token: String,

    /// Token type (always "Bearer")
    pub token_type: String,

    /// Access token expiration in seconds
    pub expires_in: i64,

    /// Refresh token expiration in seconds
    pub refresh_expires_in: i64,
}

impl TokenPair {
    /// Create a new token pair.
    pub fn new(access_token: String, refresh_token: String, expires_in: i64, refresh_expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_expires_in,
        }
    }
}

/// Mints signed tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<KeyRing>,
    config: AuthConfig,
}

impl TokenIssuer {
    /// Create an issuer over a key ring.
    pub fn new(keys: Arc<KeyRing>, config: AuthConfig) -> Self {
        Self { keys, config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The key ring in use.
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Lifetime of a token variant.
    pub fn ttl(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.config.access_token_ttl,
            TokenType::Refresh => self.config.refresh_token_ttl,
            TokenType::RememberMe => self.config.remember_me_ttl,
            TokenType::AuthorizationCode => self.config.authorization_code_ttl,
        }
    }

    fn claims(&self, user_id: &str, identifier: &str, role: &str, token_type: TokenType) -> TokenClaims {
        TokenClaims::new(user_id, identifier, role, self.ttl(token_type))
            .with_token_type(token_type)
            .with_issuer(&self.config.issuer)
    }

    /// Sign arbitrary internal claims with HS256.
    ///
    /// An empty issuer is replaced by the configured one.
    pub fn sign(&self, claims: &TokenClaims) -> AuthResult<String> {
        if claims.iss.is_empty() {
            let mut claims = claims.clone();
            claims.iss = self.config.issuer.clone();
            return self.keys.sign_hs256(&claims);
        }
        self.keys.sign_hs256(claims)
    }

    /// Issue an access token.
    pub fn issue_access(&self, user_id: &str, identifier: &str, role: &str) -> AuthResult<String> {
        self.sign(&self.claims(user_id, identifier, role, TokenType::Access))
    }

    /// Issue a refresh token.
    pub fn issue_refresh(&self, user_id: &str, identifier: &str, role: &str) -> AuthResult<String> {
        self.sign(&self.claims(user_id, identifier, role, TokenType::Refresh))
    }

    /// Issue a remember-me token.
    pub fn issue_remember_me(&self, user_id: &str, identifier: &str, role: &str) -> AuthResult<String> {
        self.sign(&self.claims(user_id, identifier, role, TokenType::RememberMe))
    }

    /// Issue an access-lifetime token carrying the caller's project mapping.
    ///
    /// When a project key is present it also becomes the token audience.
    pub fn issue_unified(
        &self,
        user_id: &str,
        identifier: &str,
        role: &str,
        project_key: Option<&str>,
        local_user_id: Option<&str>,
    ) -> AuthResult<String> {
        let mut claims = self
            .claims(user_id, identifier, role, TokenType::Access)
            .with_project(project_key.map(String::from), local_user_id.map(String::from));
        if let Some(key) = project_key {
            claims.aud = Some(key.to_string());
        }
        self.sign(&claims)
    }

    /// Issue an access token bound to `audience` (token exchange).
    pub fn issue_access_with_audience(
        &self,
        user_id: &str,
        identifier: &str,
        role: &str,
        audience: &str,
    ) -> AuthResult<String> {
        if audience.is_empty() {
            return Err(AuthError::InvalidRequest("audience is required".to_string()));
        }
        let claims = self
            .claims(user_id, identifier, role, TokenType::Access)
            .with_audience(audience);
        self.sign(&claims)
    }

    /// Issue an access and a refresh token together.
    pub fn issue_token_pair(&self, user_id: &str, identifier: &str, role: &str) -> AuthResult<TokenPair> {
        let access = self.issue_access(user_id, identifier, role)?;
        let refresh = self.issue_refresh(user_id, identifier, role)?;
        Ok(TokenPair::new(
            access,
            refresh,
            self.config.access_token_ttl.num_seconds(),
            self.config.refresh_token_ttl.num_seconds(),
        ))
    }

    /// Re-issue a token of the same variant with a fresh lifetime.
    ///
    /// Only access and remember-me tokens can be extended; project claims
    /// and audience are carried over.
    pub fn reissue(&self, claims: &TokenClaims) -> AuthResult<String> {
        match claims.token_type {
            TokenType::Access | TokenType::RememberMe => {}
            other => {
                return Err(AuthError::WrongTokenType {
                    expected: TokenType::Access,
                    actual: other,
                })
            }
        }

        let now = Utc::now();
        let mut fresh = claims.clone();
        fresh.iat = now.timestamp();
        fresh.nbf = now.timestamp();
        fresh.exp = (now + self.ttl(claims.token_type)).timestamp();
        fresh.jti = Uuid::now_v7().to_string();
        self.sign(&fresh)
    }

    /// Issue an RS256 authorization code.
    ///
    /// PKCE, state and app id are embedded only when supplied.
    pub fn issue_authorization_code(&self, grant: &CodeGrant) -> AuthResult<String> {
        let now = Utc::now();
        let claims = AuthorizationCodeClaims {
            iss: self.config.oauth_issuer.clone(),
            sub: grant.user_id.clone(),
            aud: grant.client_id.clone(),
            exp: (now + self.config.authorization_code_ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            token_type: TokenType::AuthorizationCode,
            redirect_uri: grant.redirect_uri.clone(),
            scope: grant.scope.clone(),
            code_challenge: grant.pkce.as_ref().map(|p| p.code_challenge.clone()),
            code_challenge_method: grant.pkce.as_ref().map(|p| p.code_challenge_method.clone()),
            state: grant.state.clone().filter(|s| !s.is_empty()),
            app_id: grant.app_id.clone().filter(|s| !s.is_empty()),
            session_id: grant.session_id.clone(),
        };
        self.keys.sign_rs256(&claims)
    }

    /// Sign an authorization code from explicit claims.
    pub fn sign_authorization_code(&self, claims: &AuthorizationCodeClaims) -> AuthResult<String> {
        self.keys.sign_rs256(claims)
    }

    fn oauth_claims(&self, grant: &OAuthGrant, token_type: TokenType, ttl: Duration) -> OAuthTokenClaims {
        let now = Utc::now();
        OAuthTokenClaims {
            iss: self.config.oauth_issuer.clone(),
            sub: grant.subject.as_ref().map(|s| s.user_id.clone()),
            aud: grant.client_id.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            token_type,
            scope: grant.scope.clone(),
            identifier: grant.subject.as_ref().map(|s| s.identifier.clone()),
            role: grant.subject.as_ref().map(|s| s.role.clone()),
            app_id: grant.app_id.clone(),
        }
    }

    /// Issue RS256 tokens for the OAuth token endpoint.
    pub fn issue_oauth_tokens(&self, grant: &OAuthGrant, with_refresh: bool) -> AuthResult<IssuedOAuthTokens> {
        let access_claims = self.oauth_claims(grant, TokenType::Access, self.config.oauth_access_token_ttl);
        let access_token = self.keys.sign_rs256(&access_claims)?;

        let (refresh_token, refresh_claims) = if with_refresh {
            let claims = self.oauth_claims(grant, TokenType::Refresh, self.config.oauth_refresh_token_ttl);
            (Some(self.keys.sign_rs256(&claims)?), Some(claims))
        } else {
            (None, None)
        };

        Ok(IssuedOAuthTokens {
            access_token,
            access_claims,
            refresh_token,
            refresh_claims,
            expires_in: self.config.oauth_access_token_ttl.num_seconds(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::keys::testing::{key_ring, TEST_SECRET};

    pub(crate) fn issuer() -> TokenIssuer {
        TokenIssuer::new(key_ring(), AuthConfig::with_secret(TEST_SECRET))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::issuer;
    use super::*;
    use jsonwebtoken::decode_header;

    #[test]
    fn test_token_pair() {
        let pair = TokenPair::new("access".to_string(), "refresh".to_string(), 3600, 86400);

        assert_eq!(pair.access_token, "access");
        assert_eq!(pair.refresh_token, "refresh");
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);
        assert_eq!(pair.refresh_expires_in, 86400);
    }

    #[test]
    fn test_internal_tokens_are_hs256() {
        let issuer = issuer();
        let token = issuer.issue_access("u1", "u1@example.com", "user").unwrap();
        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, jsonwebtoken::Algorithm::HS256);
        assert!(header.kid.is_none());
    }

    #[test]
    fn test_codes_are_rs256_with_kid() {
        let issuer = issuer();
        let code = issuer
            .issue_authorization_code(&CodeGrant {
                user_id: "u1".into(),
                client_id: "client-1".into(),
                redirect_uri: "https://app.example.com/cb".into(),
                scope: "openid".into(),
                ..Default::default()
            })
            .unwrap();
        let header = decode_header(&code).unwrap();
        assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(issuer.keys().active_kid()));
    }

    #[test]
    fn test_ttl_policy() {
        let issuer = issuer();
        assert_eq!(issuer.ttl(TokenType::Access), Duration::hours(1));
        assert_eq!(issuer.ttl(TokenType::Refresh), Duration::hours(24));
        assert_eq!(issuer.ttl(TokenType::RememberMe), Duration::hours(720));
        assert_eq!(issuer.ttl(TokenType::AuthorizationCode), Duration::minutes(10));
    }

    #[test]
    fn test_audience_required_for_exchange() {
        let issuer = issuer();
        let result = issuer.issue_access_with_audience("u1", "id", "user", "");
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
    }

    #[test]
    fn test_refresh_cannot_be_reissued() {
        let issuer = issuer();
        let claims = TokenClaims::new("u1", "id", "user", Duration::hours(1)).with_token_type(TokenType::Refresh);
        assert!(matches!(
            issuer.reissue(&claims),
            Err(AuthError::WrongTokenType { .. })
        ));
    }

    #[test]
    fn test_client_credentials_tokens_have_no_subject() {
        let issuer = issuer();
        let tokens = issuer
            .issue_oauth_tokens(
                &OAuthGrant {
                    client_id: "machine".into(),
                    scope: "read".into(),
                    subject: None,
                    app_id: None,
                },
                false,
            )
            .unwrap();
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.access_claims.sub.is_none());
        assert_eq!(tokens.expires_in, 3600);
    }
}
