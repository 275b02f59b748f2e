//! OAuth2 / OpenID Connect provider operations
//!
//! Transport-agnostic handlers for the token, userinfo, revocation and
//! introspection endpoints, plus the JWKS and discovery documents. Request
//! and response types are serde structs so any HTTP layer can bind them
//! directly from form bodies and emit them as JSON.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unit_auth::{
//!     AuthConfig, KeyRing, MemoryClientRegistry, MemoryUserDirectory, OAuthServer, SessionRegistry,
//!     TokenIssuer, TokenRequest, TokenValidator,
//! };
//!
//! # async fn run() -> unit_auth::AuthResult<()> {
//! let config = AuthConfig::from_env();
//! let keys = Arc::new(KeyRing::from_config(&config)?);
//! let server = OAuthServer::new(
//!     TokenIssuer::new(keys.clone(), config.clone()),
//!     TokenValidator::new(keys, &config),
//!     Arc::new(MemoryClientRegistry::new()),
//!     SessionRegistry::in_memory(),
//!     Arc::new(MemoryUserDirectory::new()),
//! );
//!
//! let request: TokenRequest = serde_json::from_str(
//!     r#"{"grant_type":"client_credentials","client_id":"svc","client_secret":"s"}"#,
//! ).unwrap();
//! let response = server.token(&request).await?;
//! println!("{}", response.access_token);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use unit_org::Principal;

use crate::authorization_code::{AuthorizationCodeEngine, AuthorizeOutcome, AuthorizeRequest, CodeExchangeRequest};
use crate::claims::{OAuthTokenClaims, TokenClaims, TokenType};
use crate::client::{
    ClientRegistry, OAuthClient, GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_PASSWORD,
    GRANT_REFRESH_TOKEN,
};
use crate::directory::UserDirectory;
use crate::error::{AuthError, AuthResult};
use crate::issuer::{IssuedOAuthTokens, OAuthGrant, OAuthSubject, TokenIssuer};
use crate::keys::JwkSet;
use crate::pkce::{METHOD_PLAIN, METHOD_S256};
use crate::refresh::hash_token;
use crate::session::SessionRegistry;
use crate::validator::TokenValidator;

/// Grant types understood by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    /// `authorization_code`
    AuthorizationCode,
    /// `refresh_token`
    RefreshToken,
    /// `password`
    Password,
    /// `client_credentials`
    ClientCredentials,
}

impl GrantType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => GRANT_AUTHORIZATION_CODE,
            GrantType::RefreshToken => GRANT_REFRESH_TOKEN,
            GrantType::Password => GRANT_PASSWORD,
            GrantType::ClientCredentials => GRANT_CLIENT_CREDENTIALS,
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            GRANT_AUTHORIZATION_CODE => Some(GrantType::AuthorizationCode),
            GRANT_REFRESH_TOKEN => Some(GrantType::RefreshToken),
            GRANT_PASSWORD => Some(GrantType::Password),
            GRANT_CLIENT_CREDENTIALS => Some(GrantType::ClientCredentials),
            _ => None,
        }
    }
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Grant type
    pub grant_type: String,

    /// Client id
    #[serde(default)]
    pub client_id: String,

    /// Client secret
    #[serde(default)]
    pub client_secret: String,

    /// Authorization code (`authorization_code`)
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (`authorization_code`)
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE verifier (`authorization_code`)
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// State (`authorization_code`, double verification)
    #[serde(default)]
    pub state: Option<String>,

    /// App id (`authorization_code`, double verification)
    #[serde(default)]
    pub app_id: Option<String>,

    /// First-party caller (`authorization_code`)
    #[serde(default)]
    pub internal_auth: bool,

    /// Asks for double verification together with `internal_auth`
    #[serde(default)]
    pub double_verification: bool,

    /// Refresh token (`refresh_token`)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Username (`password`)
    #[serde(default)]
    pub username: Option<String>,

    /// Password (`password`)
    #[serde(default)]
    pub password: Option<String>,

    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    /// RS256 access token
    pub access_token: String,

    /// Always `Bearer`
    pub token_type: String,

    /// Access token lifetime in seconds
    pub expires_in: i64,

    /// RS256 refresh token, absent for `client_credentials`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scope
    pub scope: String,
}

impl TokenResponse {
    fn new(tokens: IssuedOAuthTokens, scope: String) -> Self {
        Self {
            access_token: tokens.access_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            refresh_token: tokens.refresh_token,
            scope,
        }
    }
}

/// OpenID Connect userinfo claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    /// Subject
    pub sub: String,
    /// Preferred username
    pub preferred_username: String,
    /// Display name
    pub name: String,
    /// Nickname
    pub nickname: String,
    /// Email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the email is verified
    pub email_verified: bool,
    /// Phone number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Whether the phone number is verified
    pub phone_number_verified: bool,
    /// Avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl From<&Principal> for UserInfo {
    fn from(p: &Principal) -> Self {
        let preferred_username = p.preferred_username().to_string();
        let name = if p.nickname.is_empty() {
            preferred_username.clone()
        } else {
            p.nickname.clone()
        };
        Self {
            sub: p.id.clone(),
            preferred_username,
            name,
            nickname: p.nickname.clone(),
            email: p.email.clone(),
            email_verified: p.email_verified,
            phone_number: p.phone.clone(),
            phone_number_verified: p.phone_verified,
            picture: Some(p.avatar.clone()).filter(|a| !a.is_empty()),
        }
    }
}

/// Form body of the revocation and introspection endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenOperationRequest {
    /// Token to act on
    pub token: String,

    /// Optional `access_token` / `refresh_token` hint
    #[serde(default)]
    pub token_type_hint: Option<String>,

    /// Client id
    #[serde(default)]
    pub client_id: String,

    /// Client secret
    #[serde(default)]
    pub client_secret: String,
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntrospectionResponse {
    /// Whether the token is currently valid
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    /// `{"active": false}`
    pub fn inactive() -> Self {
        Self::default()
    }
}

impl From<TokenClaims> for IntrospectionResponse {
    fn from(c: TokenClaims) -> Self {
        Self {
            active: true,
            sub: Some(c.sub),
            identifier: Some(c.identifier),
            role: Some(c.role),
            project_key: c.project_key,
            local_user_id: c.local_user_id,
            token_type: Some(c.token_type.as_str().to_string()),
            client_id: c.aud,
            scope: None,
            exp: Some(c.exp),
            iat: Some(c.iat),
            iss: Some(c.iss),
        }
    }
}

impl From<OAuthTokenClaims> for IntrospectionResponse {
    fn from(c: OAuthTokenClaims) -> Self {
        Self {
            active: true,
            sub: c.sub,
            identifier: c.identifier,
            role: c.role,
            project_key: None,
            local_user_id: None,
            token_type: Some(c.token_type.as_str().to_string()),
            client_id: Some(c.aud),
            scope: Some(c.scope),
            exp: Some(c.exp),
            iat: Some(c.iat),
            iss: Some(c.iss),
        }
    }
}

/// OpenID provider metadata served at `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub end_session_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

/// The OAuth2 provider.
#[derive(Clone)]
pub struct OAuthServer {
    engine: AuthorizationCodeEngine,
    clients: Arc<dyn ClientRegistry>,
    issuer: TokenIssuer,
    validator: TokenValidator,
    sessions: SessionRegistry,
    directory: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for OAuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthServer")
            .field("issuer", &self.issuer.config().oauth_issuer)
            .finish_non_exhaustive()
    }
}

impl OAuthServer {
    /// Wire a provider together. The validator is attached to `sessions` so
    /// revoked tokens are rejected everywhere.
    pub fn new(
        issuer: TokenIssuer,
        validator: TokenValidator,
        clients: Arc<dyn ClientRegistry>,
        sessions: SessionRegistry,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let validator = validator.with_sessions(sessions.clone());
        let engine = AuthorizationCodeEngine::new(issuer.clone(), validator.clone(), clients.clone(), sessions.clone());
        Self {
            engine,
            clients,
            issuer,
            validator,
            sessions,
            directory,
        }
    }

    /// The underlying authorization-code engine.
    pub fn engine(&self) -> &AuthorizationCodeEngine {
        &self.engine
    }

    /// `GET /oauth/authorize`.
    pub async fn authorize(&self, request: &AuthorizeRequest, user: Option<&Principal>) -> AuthResult<AuthorizeOutcome> {
        self.engine.authorize(request, user).await
    }

    /// Authenticate a client by id and secret.
    pub async fn authenticate_client(&self, client_id: &str, secret: &str) -> AuthResult<OAuthClient> {
        let client = self
            .clients
            .find(client_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or(AuthError::InvalidClient)?;
        if !client.verify_secret(secret) {
            warn!(client_id, "Client secret mismatch");
            return Err(AuthError::InvalidClient);
        }
        Ok(client)
    }

    /// `POST /oauth/token`.
    #[instrument(skip(self, request), fields(grant_type = %request.grant_type, client_id = %request.client_id))]
    pub async fn token(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let grant = GrantType::parse(&request.grant_type)
            .ok_or_else(|| AuthError::UnsupportedGrantType(request.grant_type.clone()))?;
        let client = self
            .authenticate_client(&request.client_id, &request.client_secret)
            .await?;
        if !client.allows_grant(grant.as_str()) {
            return Err(AuthError::UnauthorizedClient(format!(
                "grant type {} not allowed for this client",
                grant.as_str()
            )));
        }

        let result = match grant {
            GrantType::AuthorizationCode => self.authorization_code_grant(&client, request).await,
            GrantType::RefreshToken => self.refresh_token_grant(&client, request).await,
            GrantType::Password => self.password_grant(&client, request).await,
            GrantType::ClientCredentials => self.client_credentials_grant(&client, request),
        };
        match &result {
            Ok(_) => info!("Token issued"),
            Err(e) => warn!(error = %e, "Token request rejected"),
        }
        result
    }

    async fn authorization_code_grant(&self, client: &OAuthClient, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let exchange = CodeExchangeRequest {
            code: request.code.clone().unwrap_or_default(),
            redirect_uri: request.redirect_uri.clone().unwrap_or_default(),
            code_verifier: request.code_verifier.clone(),
            state: request.state.clone(),
            app_id: request.app_id.clone(),
            internal_auth: request.internal_auth,
            double_verification: request.double_verification,
        };
        let claims = self.engine.exchange(client, &exchange).await?;
        let principal = self.active_principal(&claims.sub).await?;

        let tokens = self.issuer.issue_oauth_tokens(
            &OAuthGrant {
                client_id: client.client_id.clone(),
                scope: claims.scope.clone(),
                subject: Some(subject(&principal)),
                app_id: claims.app_id.clone(),
            },
            true,
        )?;

        if let Some(session_id) = &claims.session_id {
            self.sessions
                .record_tokens(
                    session_id,
                    Some(hash_token(&tokens.access_token)),
                    tokens.refresh_token.as_deref().map(hash_token),
                )
                .await?;
        }
        Ok(TokenResponse::new(tokens, claims.scope))
    }

    async fn refresh_token_grant(&self, client: &OAuthClient, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let raw = required(&request.refresh_token, "refresh_token")?;
        let claims = self
            .validator
            .validate_oauth_active(raw, Some(TokenType::Refresh))
            .await
            .map_err(|e| {
                debug!(error = %e, "Refresh token rejected");
                AuthError::InvalidGrant("invalid refresh token".to_string())
            })?;
        if claims.aud != client.client_id {
            return Err(AuthError::InvalidGrant("refresh token was issued to another client".to_string()));
        }
        let scope = narrow_scope(&claims.scope, request.scope.as_deref())?;

        let subject = match &claims.sub {
            Some(sub) => Some(subject(&self.active_principal(sub).await?)),
            None => None,
        };

        // Blacklisting the old jti is the rotation; only the first caller gets through.
        if !self.sessions.consume_once(&claims.jti, claims.expires_at()).await? {
            return Err(AuthError::InvalidGrant("invalid refresh token".to_string()));
        }

        let tokens = self.issuer.issue_oauth_tokens(
            &OAuthGrant {
                client_id: client.client_id.clone(),
                scope: scope.clone(),
                subject,
                app_id: claims.app_id.clone(),
            },
            true,
        )?;
        Ok(TokenResponse::new(tokens, scope))
    }

    async fn password_grant(&self, client: &OAuthClient, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let username = required(&request.username, "username")?;
        let password = required(&request.password, "password")?;
        let scope = self.requested_scope(client, request.scope.as_deref())?;

        let principal = self
            .directory
            .verify_credentials(username, password)
            .await
            .map_err(|e| match e {
                AuthError::InvalidCredentials | AuthError::UserNotFound => {
                    AuthError::InvalidGrant("invalid username or password".to_string())
                }
                other => other,
            })?;
        if !principal.is_active() {
            return Err(AuthError::AccountDisabled);
        }

        let tokens = self.issuer.issue_oauth_tokens(
            &OAuthGrant {
                client_id: client.client_id.clone(),
                scope: scope.clone(),
                subject: Some(subject(&principal)),
                app_id: None,
            },
            true,
        )?;
        Ok(TokenResponse::new(tokens, scope))
    }

    fn client_credentials_grant(&self, client: &OAuthClient, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let scope = self.requested_scope(client, request.scope.as_deref())?;
        let tokens = self.issuer.issue_oauth_tokens(
            &OAuthGrant {
                client_id: client.client_id.clone(),
                scope: scope.clone(),
                subject: None,
                app_id: None,
            },
            false,
        )?;
        Ok(TokenResponse::new(tokens, scope))
    }

    /// `GET /oauth/userinfo` for a bearer access token.
    #[instrument(skip(self, access_token))]
    pub async fn userinfo(&self, access_token: &str) -> AuthResult<UserInfo> {
        let claims = self
            .validator
            .validate_oauth_active(access_token, Some(TokenType::Access))
            .await?;
        let sub = claims
            .sub
            .ok_or_else(|| AuthError::InvalidRequest("token has no subject".to_string()))?;
        let principal = self.active_principal(&sub).await?;
        Ok(UserInfo::from(&principal))
    }

    /// `POST /oauth/revoke` (RFC 7009).
    ///
    /// Unknown, invalid and already revoked tokens all succeed, and so do
    /// tokens the client does not own, which are left untouched. An OAuth
    /// token is owned by its `aud` client. An internal token bound to an
    /// audience is owned by the client of that id; an unbound one by any
    /// first-party (`internal_auth`) client.
    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn revoke(&self, request: &TokenOperationRequest) -> AuthResult<()> {
        let client = self
            .authenticate_client(&request.client_id, &request.client_secret)
            .await?;

        if let Ok(claims) = self.validator.validate_oauth_token(&request.token, None) {
            if claims.aud != client.client_id {
                debug!("Token belongs to another client, ignoring");
                return Ok(());
            }
            return self.sessions.blacklist(&claims.jti, claims.expires_at()).await;
        }
        if let Ok(claims) = self.validator.validate(&request.token) {
            let owned = match &claims.aud {
                Some(aud) => *aud == client.client_id,
                None => client.internal_auth,
            };
            if !owned {
                debug!("Internal token not owned by client, ignoring");
                return Ok(());
            }
            return self.sessions.blacklist(&claims.jti, claims.expires_at()).await;
        }
        debug!("Nothing to revoke");
        Ok(())
    }

    /// `POST /oauth/introspect` (RFC 7662).
    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn introspect(&self, request: &TokenOperationRequest) -> AuthResult<IntrospectionResponse> {
        self.authenticate_client(&request.client_id, &request.client_secret)
            .await?;

        if let Ok(claims) = self.validator.validate_active(&request.token, None).await {
            return Ok(claims.into());
        }
        if let Ok(claims) = self.validator.validate_oauth_active(&request.token, None).await {
            return Ok(claims.into());
        }
        Ok(IntrospectionResponse::inactive())
    }

    /// End an SSO session (`/oauth/logout`).
    pub async fn logout(&self, session_id: &str) -> AuthResult<()> {
        self.sessions.end_session(session_id).await
    }

    /// `GET /.well-known/jwks.json`.
    pub fn jwks(&self) -> JwkSet {
        self.issuer.keys().jwks()
    }

    /// `GET /.well-known/openid-configuration`.
    pub fn discovery(&self) -> ProviderMetadata {
        let base = self.issuer.config().oauth_issuer.trim_end_matches('/').to_string();
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ProviderMetadata {
            authorization_endpoint: format!("{}/oauth/authorize", base),
            token_endpoint: format!("{}/oauth/token", base),
            userinfo_endpoint: format!("{}/oauth/userinfo", base),
            end_session_endpoint: format!("{}/oauth/logout", base),
            revocation_endpoint: format!("{}/oauth/revoke", base),
            introspection_endpoint: format!("{}/oauth/introspect", base),
            jwks_uri: format!("{}/.well-known/jwks.json", base),
            issuer: base,
            scopes_supported: strings(&["openid", "profile", "email", "phone", "offline_access"]),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&[
                GRANT_AUTHORIZATION_CODE,
                GRANT_REFRESH_TOKEN,
                GRANT_PASSWORD,
                GRANT_CLIENT_CREDENTIALS,
            ]),
            subject_types_supported: strings(&["public"]),
            id_token_signing_alg_values_supported: strings(&["RS256"]),
            token_endpoint_auth_methods_supported: strings(&["client_secret_post"]),
            code_challenge_methods_supported: strings(&[METHOD_S256, METHOD_PLAIN]),
            claims_supported: strings(&[
                "sub",
                "name",
                "nickname",
                "preferred_username",
                "picture",
                "email",
                "email_verified",
                "phone_number",
                "phone_number_verified",
            ]),
        }
    }

    async fn active_principal(&self, user_id: &str) -> AuthResult<Principal> {
        let principal = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !principal.is_active() {
            return Err(AuthError::AccountDisabled);
        }
        Ok(principal)
    }

    fn requested_scope(&self, client: &OAuthClient, requested: Option<&str>) -> AuthResult<String> {
        let scope = match requested.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => client.default_scope(),
        };
        if !client.allows_scope(&scope) {
            return Err(AuthError::InvalidScope(scope));
        }
        Ok(scope)
    }
}

fn subject(principal: &Principal) -> OAuthSubject {
    OAuthSubject {
        user_id: principal.id.clone(),
        identifier: principal.login_identifier().to_string(),
        role: principal.role.clone(),
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AuthResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest(format!("{} is required", name)))
}

/// A refresh may narrow but never widen the granted scope.
fn narrow_scope(granted: &str, requested: Option<&str>) -> AuthResult<String> {
    match requested.map(str::trim) {
        Some(requested) if !requested.is_empty() => {
            let allowed: Vec<&str> = granted.split_whitespace().collect();
            if requested.split_whitespace().all(|s| allowed.contains(&s)) {
                Ok(requested.to_string())
            } else {
                Err(AuthError::InvalidScope(requested.to_string()))
            }
        }
        _ => Ok(granted.to_string()),
    }
}
