//! Pluggable login providers
//!
//! Every way of proving an identity (password, third-party OAuth, ...)
//! implements [`AuthProvider`] and is registered by name in a
//! [`ProviderRegistry`]. Providers only establish *who* the user is; the
//! caller then issues tokens through [`crate::TokenIssuer`] or the
//! authorization-code flow.
//!
//! Redirect-based providers are built on the `oauth2` crate and are only
//! available with the `oauth` feature (enabled by default).

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use unit_org::Principal;

use crate::directory::UserDirectory;
use crate::error::{AuthError, AuthResult};
use crate::pkce;

/// How long a pending redirect login stays valid, in seconds.
pub const STATE_TTL_SECS: i64 = 600;

/// Kind of login a provider performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Credentials checked in-process
    Password,
    /// Browser redirect to an external identity provider
    OAuth,
}

impl ProviderKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Password => "password",
            ProviderKind::OAuth => "oauth",
        }
    }
}

/// Pending redirect login, kept by the caller between `auth_url` and the
/// callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    /// Random anti-CSRF value sent to the provider
    pub state: String,

    /// PKCE verifier for providers that support it
    pub code_verifier: Option<String>,

    /// Where to send the user after login
    pub redirect_after: Option<String>,

    /// Created timestamp
    pub created_at: i64,
}

impl OAuthState {
    /// Create a state with a random 32-character value.
    pub fn new() -> Self {
        Self {
            state: random_alphanumeric(32),
            code_verifier: None,
            redirect_after: None,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Create a state carrying a PKCE verifier.
    pub fn with_pkce() -> Self {
        Self {
            code_verifier: Some(pkce::generate_verifier()),
            ..Self::new()
        }
    }

    /// Remember where to go after login.
    pub fn redirect_after(mut self, url: impl Into<String>) -> Self {
        self.redirect_after = Some(url.into());
        self
    }

    /// S256 challenge of the verifier.
    pub fn code_challenge(&self) -> Option<String> {
        self.code_verifier.as_deref().map(pkce::s256_challenge)
    }

    /// Whether the state outlived [`STATE_TTL_SECS`].
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() - self.created_at > STATE_TTL_SECS
    }

    /// Check the value echoed back by the provider.
    pub fn verify(&self, returned: &str) -> AuthResult<()> {
        if self.is_expired() {
            return Err(AuthError::InvalidRequest("login state expired".to_string()));
        }
        if !bool::from(self.state.as_bytes().ct_eq(returned.as_bytes())) {
            return Err(AuthError::InvalidRequest("state parameter mismatch".to_string()));
        }
        Ok(())
    }
}

impl Default for OAuthState {
    fn default() -> Self {
        Self::new()
    }
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A way of authenticating users.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registry key, e.g. `password` or `github`.
    fn name(&self) -> &str;

    /// Kind of login.
    fn kind(&self) -> ProviderKind;

    /// Disabled providers stay registered but refuse to authenticate.
    fn is_enabled(&self) -> bool;

    /// Authenticate from submitted credentials.
    async fn authenticate(&self, credentials: &HashMap<String, String>) -> AuthResult<Principal>;

    /// URL to send the browser to.
    async fn auth_url(&self, _state: &OAuthState) -> AuthResult<String> {
        Err(AuthError::InvalidRequest(format!("{} does not use redirects", self.name())))
    }

    /// Finish a redirect login.
    async fn handle_callback(&self, _code: &str, _returned_state: &str, _pending: &OAuthState) -> AuthResult<Principal> {
        Err(AuthError::InvalidRequest(format!("{} does not use redirects", self.name())))
    }
}

/// Providers keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn AuthProvider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider of the same name.
    pub async fn register(&self, provider: Arc<dyn AuthProvider>) {
        let name = provider.name().to_string();
        if self.providers.write().await.insert(name.clone(), provider).is_some() {
            warn!(provider = %name, "Auth provider replaced");
        } else {
            info!(provider = %name, "Auth provider registered");
        }
    }

    /// Look up an enabled provider.
    pub async fn get(&self, name: &str) -> AuthResult<Arc<dyn AuthProvider>> {
        let provider = self
            .providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::ProviderNotFound(name.to_string()))?;
        if !provider.is_enabled() {
            return Err(AuthError::ProviderDisabled(name.to_string()));
        }
        Ok(provider)
    }

    /// Names of enabled providers, sorted.
    pub async fn enabled(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .await
            .values()
            .filter(|p| p.is_enabled())
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Authenticate through the named provider.
    #[instrument(skip(self, credentials))]
    pub async fn authenticate(&self, name: &str, credentials: &HashMap<String, String>) -> AuthResult<Principal> {
        let principal = self.get(name).await?.authenticate(credentials).await?;
        if !principal.is_active() {
            return Err(AuthError::AccountDisabled);
        }
        debug!(user_id = %principal.id, "Provider login succeeded");
        Ok(principal)
    }
}

/// Username/password login against a [`UserDirectory`].
///
/// Accepts the identifier under `username`, `email` or `phone`.
pub struct DirectoryPasswordProvider {
    directory: Arc<dyn UserDirectory>,
    enabled: bool,
}

impl DirectoryPasswordProvider {
    /// Create an enabled provider.
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            enabled: true,
        }
    }

    /// Toggle the provider.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl AuthProvider for DirectoryPasswordProvider {
    fn name(&self) -> &str {
        "password"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Password
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn authenticate(&self, credentials: &HashMap<String, String>) -> AuthResult<Principal> {
        let identifier = ["username", "email", "phone"]
            .iter()
            .find_map(|k| credentials.get(*k).filter(|v| !v.is_empty()))
            .ok_or_else(|| AuthError::InvalidRequest("username is required".to_string()))?;
        let password = credentials
            .get("password")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::InvalidRequest("password is required".to_string()))?;
        self.directory.verify_credentials(identifier, password).await
    }
}

#[cfg(feature = "oauth")]
pub use redirect::*;

#[cfg(feature = "oauth")]
mod redirect {
    use super::*;
    use oauth2::basic::BasicClient;
    use oauth2::{AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenUrl};

    /// Well-known external identity providers.
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "snake_case")]
    pub enum ExternalProvider {
        /// GitHub
        GitHub,
        /// Google
        Google,
        /// WeChat open platform
        WeChat,
        /// Anything else; URLs must be configured
        Custom,
    }

    impl ExternalProvider {
        /// Get the string representation.
        pub fn as_str(&self) -> &'static str {
            match self {
                ExternalProvider::GitHub => "github",
                ExternalProvider::Google => "google",
                ExternalProvider::WeChat => "wechat",
                ExternalProvider::Custom => "custom",
            }
        }

        /// Parse from string.
        pub fn parse(s: &str) -> Option<Self> {
            match s.to_lowercase().as_str() {
                "github" => Some(ExternalProvider::GitHub),
                "google" => Some(ExternalProvider::Google),
                "wechat" | "weixin" => Some(ExternalProvider::WeChat),
                "custom" => Some(ExternalProvider::Custom),
                _ => None,
            }
        }

        fn default_auth_url(&self) -> Option<&'static str> {
            match self {
                ExternalProvider::GitHub => Some("https://github.com/login/oauth/authorize"),
                ExternalProvider::Google => Some("https://accounts.google.com/o/oauth2/v2/auth"),
                ExternalProvider::WeChat => Some("https://open.weixin.qq.com/connect/qrconnect"),
                ExternalProvider::Custom => None,
            }
        }

        fn default_token_url(&self) -> Option<&'static str> {
            match self {
                ExternalProvider::GitHub => Some("https://github.com/login/oauth/access_token"),
                ExternalProvider::Google => Some("https://oauth2.googleapis.com/token"),
                ExternalProvider::WeChat => Some("https://api.weixin.qq.com/sns/oauth2/access_token"),
                ExternalProvider::Custom => None,
            }
        }

        fn default_scopes(&self) -> &'static [&'static str] {
            match self {
                ExternalProvider::GitHub => &["user:email", "read:user"],
                ExternalProvider::Google => &["openid", "email", "profile"],
                ExternalProvider::WeChat => &["snsapi_login"],
                ExternalProvider::Custom => &[],
            }
        }
    }

    /// Client registration at an external identity provider.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExternalProviderConfig {
        /// Which provider
        pub provider: ExternalProvider,

        /// Client id issued by the provider
        pub client_id: String,

        /// Client secret issued by the provider
        #[serde(skip_serializing)]
        pub client_secret: String,

        /// Authorization URL override
        pub auth_url: Option<String>,

        /// Token URL override
        pub token_url: Option<String>,

        /// Our callback URL
        pub redirect_url: String,

        /// Scopes to request
        pub scopes: Vec<String>,

        /// Extra authorization parameters
        #[serde(default)]
        pub extra_params: HashMap<String, String>,

        /// Whether logins are accepted
        #[serde(default = "enabled_by_default")]
        pub enabled: bool,
    }

    fn enabled_by_default() -> bool {
        true
    }

    impl ExternalProviderConfig {
        /// Configuration with the provider's default URLs and scopes.
        pub fn new(
            provider: ExternalProvider,
            client_id: impl Into<String>,
            client_secret: impl Into<String>,
            redirect_url: impl Into<String>,
        ) -> Self {
            Self {
                provider,
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                auth_url: None,
                token_url: None,
                redirect_url: redirect_url.into(),
                scopes: provider.default_scopes().iter().map(|s| s.to_string()).collect(),
                extra_params: HashMap::new(),
                enabled: true,
            }
        }

        fn resolved_auth_url(&self) -> AuthResult<String> {
            self.auth_url
                .clone()
                .or_else(|| self.provider.default_auth_url().map(String::from))
                .ok_or_else(|| AuthError::ConfigError("authorization URL not configured".to_string()))
        }

        fn resolved_token_url(&self) -> AuthResult<String> {
            self.token_url
                .clone()
                .or_else(|| self.provider.default_token_url().map(String::from))
                .ok_or_else(|| AuthError::ConfigError("token URL not configured".to_string()))
        }

        fn client(&self) -> AuthResult<BasicClient> {
            let config_err = |e: url::ParseError| AuthError::ConfigError(e.to_string());
            Ok(BasicClient::new(
                ClientId::new(self.client_id.clone()),
                Some(ClientSecret::new(self.client_secret.clone())),
                AuthUrl::new(self.resolved_auth_url()?).map_err(config_err)?,
                Some(TokenUrl::new(self.resolved_token_url()?).map_err(config_err)?),
            )
            .set_redirect_uri(RedirectUrl::new(self.redirect_url.clone()).map_err(config_err)?))
        }
    }

    /// Profile returned by an external provider.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExternalUserInfo {
        /// Provider-specific user id
        pub provider_id: String,

        /// Email address
        pub email: Option<String>,

        /// Whether the provider verified the email
        #[serde(default)]
        pub email_verified: bool,

        /// Display name
        pub name: Option<String>,

        /// Avatar URL
        pub picture: Option<String>,
    }

    /// The HTTP half of a redirect login: code exchange and profile fetch.
    #[async_trait]
    pub trait ExternalIdentityClient: Send + Sync {
        /// Exchange the callback code for a provider access token.
        async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> AuthResult<String>;

        /// Fetch the profile behind a provider access token.
        async fn user_info(&self, access_token: &str) -> AuthResult<ExternalUserInfo>;
    }

    /// Login through an external OAuth2 provider.
    ///
    /// The external account is linked to a local principal by verified
    /// email; accounts are not created here.
    pub struct OAuthRedirectProvider {
        config: ExternalProviderConfig,
        client: Arc<dyn ExternalIdentityClient>,
        directory: Arc<dyn UserDirectory>,
    }

    impl OAuthRedirectProvider {
        /// Create a provider.
        pub fn new(
            config: ExternalProviderConfig,
            client: Arc<dyn ExternalIdentityClient>,
            directory: Arc<dyn UserDirectory>,
        ) -> Self {
            Self {
                config,
                client,
                directory,
            }
        }
    }

    #[async_trait]
    impl AuthProvider for OAuthRedirectProvider {
        fn name(&self) -> &str {
            self.config.provider.as_str()
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::OAuth
        }

        fn is_enabled(&self) -> bool {
            self.config.enabled
        }

        async fn authenticate(&self, _credentials: &HashMap<String, String>) -> AuthResult<Principal> {
            Err(AuthError::InvalidRequest(format!(
                "{} requires a redirect login",
                self.name()
            )))
        }

        async fn auth_url(&self, state: &OAuthState) -> AuthResult<String> {
            let client = self.config.client()?;
            let csrf = state.state.clone();
            let mut request = client.authorize_url(move || CsrfToken::new(csrf));
            for scope in &self.config.scopes {
                request = request.add_scope(Scope::new(scope.clone()));
            }
            if let Some(verifier) = &state.code_verifier {
                let challenge = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.clone()));
                request = request.set_pkce_challenge(challenge);
            }
            for (name, value) in &self.config.extra_params {
                request = request.add_extra_param(name.as_str(), value.as_str());
            }
            let (url, _) = request.url();
            Ok(url.to_string())
        }

        #[instrument(skip(self, code, returned_state, pending), fields(provider = %self.name()))]
        async fn handle_callback(&self, code: &str, returned_state: &str, pending: &OAuthState) -> AuthResult<Principal> {
            pending.verify(returned_state)?;
            let access_token = self
                .client
                .exchange_code(code, pending.code_verifier.as_deref())
                .await?;
            let profile = self.client.user_info(&access_token).await?;

            let email = profile
                .email
                .filter(|_| profile.email_verified)
                .ok_or_else(|| AuthError::InvalidGrant("provider did not return a verified email".to_string()))?;
            let principal = self
                .directory
                .find_by_identifier(&email)
                .await?
                .ok_or(AuthError::UserNotFound)?;
            debug!(user_id = %principal.id, provider_id = %profile.provider_id, "External account linked");
            Ok(principal)
        }
    }
}
