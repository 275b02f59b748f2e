//! OAuth2 authorization-code flow
//!
//! A code moves through four states: requested, issued, exchanged and
//! consumed. Codes are RS256 JWTs carrying everything the exchange needs,
//! so nothing is stored at issuance apart from the SSO session.
//!
//! Exchanges flagged `internal_auth && double_verification` (by the request,
//! or by a client registered that way) must present the PKCE verifier, the
//! original `state` and the `app_id` together, and all three must match what
//! was embedded in the code.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use unit_org::Principal;
use url::Url;

use crate::claims::{AuthorizationCodeClaims, PkceChallenge};
use crate::client::{ClientRegistry, OAuthClient};
use crate::error::{AuthError, AuthResult};
use crate::issuer::{CodeGrant, TokenIssuer};
use crate::pkce;
use crate::session::{SessionRegistry, SsoSession};
use crate::validator::TokenValidator;

/// Parameters of `GET /authorize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizeRequest {
    /// Requesting client
    pub client_id: String,

    /// Where to send the code
    pub redirect_uri: String,

    /// Must be `code`
    pub response_type: String,

    /// Requested scope; the client's default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Anti-CSRF state echoed back on redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// PKCE challenge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE challenge method, `plain` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Requesting application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

/// Result of an authorization request.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizeOutcome {
    /// No authenticated user; the caller must run a login and retry with
    /// the same parameters.
    LoginRequired {
        /// Original request
        request: AuthorizeRequest,
    },

    /// Code issued.
    Redirect {
        /// Redirect URI with `code` and `state` appended
        redirect_url: String,
        /// The issued code
        code: String,
        /// SSO session opened for the grant
        session_id: String,
    },
}

/// Parameters of an `authorization_code` grant relevant to the code itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeExchangeRequest {
    /// The code
    pub code: String,

    /// Redirect URI, must equal the one used at authorization
    pub redirect_uri: String,

    /// PKCE verifier
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// State, required under double verification
    #[serde(default)]
    pub state: Option<String>,

    /// App id, required under double verification
    #[serde(default)]
    pub app_id: Option<String>,

    /// Caller is a first-party application
    #[serde(default)]
    pub internal_auth: bool,

    /// Caller asks for double verification; effective with `internal_auth`
    #[serde(default)]
    pub double_verification: bool,
}

impl CodeExchangeRequest {
    /// Whether the request itself asks for double verification.
    pub fn requests_double_verification(&self) -> bool {
        self.internal_auth && self.double_verification
    }
}

/// Issues and redeems authorization codes.
#[derive(Clone)]
pub struct AuthorizationCodeEngine {
    issuer: TokenIssuer,
    validator: TokenValidator,
    clients: Arc<dyn ClientRegistry>,
    sessions: SessionRegistry,
}

impl std::fmt::Debug for AuthorizationCodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeEngine").finish_non_exhaustive()
    }
}

impl AuthorizationCodeEngine {
    /// Create an engine.
    pub fn new(
        issuer: TokenIssuer,
        validator: TokenValidator,
        clients: Arc<dyn ClientRegistry>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            issuer,
            validator,
            clients,
            sessions,
        }
    }

    /// Validate the request against the client registration.
    ///
    /// Returns the client and the effective scope.
    pub async fn validate_request(&self, request: &AuthorizeRequest) -> AuthResult<(OAuthClient, String)> {
        if request.client_id.is_empty() {
            return Err(AuthError::InvalidRequest("client_id is required".to_string()));
        }
        let client = self
            .clients
            .find(&request.client_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or(AuthError::InvalidClient)?;

        if request.response_type != "code" {
            return Err(AuthError::UnsupportedResponseType(request.response_type.clone()));
        }
        if request.redirect_uri.is_empty() {
            return Err(AuthError::InvalidRequest("redirect_uri is required".to_string()));
        }
        if !client.allows_redirect(&request.redirect_uri) {
            warn!(client_id = %client.client_id, "Unregistered redirect_uri");
            return Err(AuthError::InvalidRequest("redirect_uri is not registered".to_string()));
        }

        let scope = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => scope.to_string(),
            _ => client.default_scope(),
        };
        if !client.allows_scope(&scope) {
            return Err(AuthError::InvalidScope(scope));
        }

        match (&request.code_challenge, &request.code_challenge_method) {
            (Some(_), Some(method)) if !pkce::is_supported_method(method) => {
                return Err(AuthError::InvalidRequest(format!(
                    "unsupported code_challenge_method: {}",
                    method
                )));
            }
            (None, Some(_)) => {
                return Err(AuthError::InvalidRequest(
                    "code_challenge_method without code_challenge".to_string(),
                ));
            }
            _ => {}
        }

        if client.requires_double_verification() {
            if request.code_challenge.is_none() {
                return Err(AuthError::MissingPkceParameters("PKCE code_challenge required".to_string()));
            }
            if is_blank(&request.state) {
                return Err(AuthError::MissingPkceParameters(
                    "state parameter is required for CSRF protection".to_string(),
                ));
            }
            if is_blank(&request.app_id) {
                return Err(AuthError::MissingPkceParameters(
                    "app_id is required for layered authentication".to_string(),
                ));
            }
        }

        Ok((client, scope))
    }

    /// Handle an authorization request.
    ///
    /// Without an authenticated user the request is handed back as
    /// [`AuthorizeOutcome::LoginRequired`]. Otherwise a code is minted and
    /// the redirect URL is built; the SSO session is stored last so a failure
    /// on the way leaves nothing behind.
    #[instrument(skip(self, request, user), fields(client_id = %request.client_id))]
    pub async fn authorize(&self, request: &AuthorizeRequest, user: Option<&Principal>) -> AuthResult<AuthorizeOutcome> {
        let (client, scope) = self.validate_request(request).await?;

        let Some(user) = user else {
            debug!("No authenticated user, login required");
            return Ok(AuthorizeOutcome::LoginRequired {
                request: request.clone(),
            });
        };
        if !user.is_active() {
            return Err(AuthError::AccountDisabled);
        }

        let pkce = request
            .code_challenge
            .as_ref()
            .map(|c| PkceChallenge::new(c.clone(), request.code_challenge_method.clone().unwrap_or_default()));

        let session = SsoSession::new(
            &user.id,
            &client.client_id,
            &scope,
            Utc::now() + self.issuer.config().oauth_refresh_token_ttl,
        )
        .with_pkce(
            pkce.as_ref().map(|p| p.code_challenge.clone()),
            pkce.as_ref().map(|p| p.code_challenge_method.clone()),
        );

        let code = self.issuer.issue_authorization_code(&CodeGrant {
            user_id: user.id.clone(),
            client_id: client.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope,
            pkce,
            state: request.state.clone(),
            app_id: request.app_id.clone(),
            session_id: Some(session.id.clone()),
        })?;

        let redirect_url = build_redirect(&request.redirect_uri, &code, request.state.as_deref())?;
        let session = self.sessions.open_session(session).await?;
        info!(user_id = %user.id, session_id = %session.id, "Authorization code issued");

        Ok(AuthorizeOutcome::Redirect {
            redirect_url,
            code,
            session_id: session.id,
        })
    }

    /// Redeem a code for `client`.
    ///
    /// The client must already be authenticated. Returns the code's claims
    /// so the caller can mint tokens for its subject.
    #[instrument(skip(self, client, request), fields(client_id = %client.client_id))]
    pub async fn exchange(
        &self,
        client: &OAuthClient,
        request: &CodeExchangeRequest,
    ) -> AuthResult<AuthorizationCodeClaims> {
        if request.code.is_empty() {
            return Err(AuthError::InvalidRequest("code is required".to_string()));
        }

        let claims = self
            .validator
            .validate_authorization_code(&request.code)
            .map_err(|e| {
                debug!(error = %e, "Authorization code rejected");
                match e {
                    AuthError::Expired => AuthError::InvalidGrant("authorization code expired".to_string()),
                    _ => AuthError::InvalidGrant("invalid authorization code".to_string()),
                }
            })?;

        if claims.aud != client.client_id {
            warn!("Authorization code presented by another client");
            return Err(AuthError::InvalidGrant("client_id mismatch".to_string()));
        }
        if claims.redirect_uri != request.redirect_uri {
            return Err(AuthError::InvalidGrant("redirect_uri mismatch".to_string()));
        }

        if request.requests_double_verification() || client.requires_double_verification() {
            verify_double(&claims, request)?;
        } else if let Some(challenge) = claims.pkce() {
            let verifier = request
                .code_verifier
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::InvalidGrant("PKCE code_verifier required".to_string()))?;
            if !pkce::verify(verifier, &challenge.code_challenge, &challenge.code_challenge_method) {
                return Err(AuthError::InvalidGrant("PKCE verification failed".to_string()));
            }
        }

        if self.issuer.config().enforce_single_use_codes
            && !self.sessions.consume_once(&claims.jti, claims.expires_at()).await?
        {
            warn!(jti = %claims.jti, "Authorization code replayed");
            return Err(AuthError::InvalidGrant("authorization code already used".to_string()));
        }

        debug!(user_id = %claims.sub, "Authorization code exchanged");
        Ok(claims)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn verify_double(claims: &AuthorizationCodeClaims, request: &CodeExchangeRequest) -> AuthResult<()> {
    let verifier = request
        .code_verifier
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::MissingPkceParameters("PKCE code_verifier required".to_string()))?;
    let state = request
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingPkceParameters("state parameter is required for CSRF protection".to_string()))?;
    let app_id = request
        .app_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingPkceParameters("app_id is required for layered authentication".to_string()))?;

    if !pkce::verifier_length_ok(verifier) {
        return Err(AuthError::InvalidGrant(
            "invalid code_verifier length (must be 43-128 characters)".to_string(),
        ));
    }
    if claims.state.as_deref() != Some(state) {
        return Err(AuthError::InvalidGrant("state parameter mismatch".to_string()));
    }
    if claims.app_id.as_deref() != Some(app_id) {
        return Err(AuthError::InvalidGrant("app_id mismatch".to_string()));
    }

    let challenge = claims
        .pkce()
        .ok_or_else(|| AuthError::InvalidGrant("authorization code carries no PKCE challenge".to_string()))?;
    if !pkce::verify(verifier, &challenge.code_challenge, &challenge.code_challenge_method) {
        return Err(AuthError::InvalidGrant("PKCE verification failed".to_string()));
    }
    Ok(())
}

fn build_redirect(redirect_uri: &str, code: &str, state: Option<&str>) -> AuthResult<String> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| AuthError::InvalidRequest(format!("invalid redirect_uri: {}", e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}
