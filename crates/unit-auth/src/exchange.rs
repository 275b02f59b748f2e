//! Token exchange between projects.
//!
//! A project holding a user's access token can trade it for a token bound
//! to another project's audience, so the downstream project can call
//! [`TokenValidator::validate_for_audience`] and refuse tokens minted for
//! someone else. Blacklisted and non-access tokens cannot be exchanged.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::claims::TokenType;
use crate::error::{AuthError, AuthResult};
use crate::issuer::TokenIssuer;
use crate::validator::TokenValidator;

/// RFC 8693 identifier of an access token.
pub const ACCESS_TOKEN_TYPE_URN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Token exchange request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeRequest {
    /// The caller's access token
    pub subject_token: String,

    /// Target project (becomes the `aud` claim)
    pub audience: String,
}

/// Token exchange response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenExchangeResponse {
    /// Audience-bound access token
    pub access_token: String,

    /// Always [`ACCESS_TOKEN_TYPE_URN`]
    pub issued_token_type: String,

    /// Token type (always "Bearer")
    pub token_type: String,

    /// Expires in seconds
    pub expires_in: i64,

    /// Audience the token is valid for
    pub audience: String,
}

impl TokenExchangeResponse {
    /// Create a new token exchange response.
    pub fn new(access_token: String, audience: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token,
            issued_token_type: ACCESS_TOKEN_TYPE_URN.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            audience: audience.into(),
        }
    }
}

/// Exchanges access tokens for audience-bound ones.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    issuer: TokenIssuer,
    validator: TokenValidator,
}

impl TokenExchange {
    /// Create an exchange service.
    pub fn new(issuer: TokenIssuer, validator: TokenValidator) -> Self {
        Self { issuer, validator }
    }

    /// Trade `subject_token` for a token bound to `audience`.
    #[instrument(skip(self, request), fields(audience = %request.audience))]
    pub async fn exchange(&self, request: &TokenExchangeRequest) -> AuthResult<TokenExchangeResponse> {
        if request.audience.is_empty() {
            return Err(AuthError::InvalidRequest("audience is required".to_string()));
        }
        let claims = self
            .validator
            .validate_active(&request.subject_token, Some(TokenType::Access))
            .await?;

        let token = self.issuer.issue_access_with_audience(
            &claims.sub,
            &claims.identifier,
            &claims.role,
            &request.audience,
        )?;
        info!(user_id = %claims.sub, "Token exchanged");

        Ok(TokenExchangeResponse::new(
            token,
            request.audience.clone(),
            self.issuer.config().access_token_ttl.num_seconds(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::testing::issuer;
    use crate::session::SessionRegistry;
    use crate::validator::testing::validator;

    #[tokio::test]
    async fn test_exchange_binds_audience() {
        let exchange = TokenExchange::new(issuer(), validator());
        let subject = issuer().issue_access("u1", "u1@example.com", "user").unwrap();

        let response = exchange
            .exchange(&TokenExchangeRequest {
                subject_token: subject,
                audience: "billing".into(),
            })
            .await
            .unwrap();

        assert_eq!(response.issued_token_type, ACCESS_TOKEN_TYPE_URN);
        assert_eq!(response.audience, "billing");
        let claims = validator().validate_for_audience(&response.access_token, "billing").unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(validator().validate_for_audience(&response.access_token, "notes").is_err());
    }

    #[tokio::test]
    async fn test_exchange_rejects_refresh_and_revoked_tokens() {
        let sessions = SessionRegistry::in_memory();
        let exchange = TokenExchange::new(issuer(), validator().with_sessions(sessions.clone()));

        let refresh = issuer().issue_refresh("u1", "u1@example.com", "user").unwrap();
        let result = exchange
            .exchange(&TokenExchangeRequest {
                subject_token: refresh,
                audience: "billing".into(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::WrongTokenType { .. })));

        let access = issuer().issue_access("u1", "u1@example.com", "user").unwrap();
        let claims = validator().validate(&access).unwrap();
        sessions.blacklist(&claims.jti, claims.expires_at()).await.unwrap();
        let result = exchange
            .exchange(&TokenExchangeRequest {
                subject_token: access,
                audience: "billing".into(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::Blacklisted)));
    }
}
