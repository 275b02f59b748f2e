//! Registered OAuth clients (relying parties).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use crate::error::AuthResult;

/// Grant types a client may be allowed to use.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
/// Refresh-token grant.
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
/// Resource-owner password grant.
pub const GRANT_PASSWORD: &str = "password";
/// Machine-to-machine grant.
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

/// An OAuth client registered with the identity service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthClient {
    /// Public client identifier
    pub client_id: String,

    /// Display name
    pub name: String,

    /// Client secret
    #[serde(skip_serializing)]
    pub secret: String,

    /// Allowed redirect URI prefixes; `*` allows any
    pub redirect_uris: Vec<String>,

    /// Allowed grant types
    pub grant_types: Vec<String>,

    /// Allowed scopes; empty allows any
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Skip the consent screen
    #[serde(default)]
    pub auto_approve: bool,

    /// Whether the client may authenticate at all
    pub is_active: bool,

    /// First-party application of the service
    #[serde(default)]
    pub internal_auth: bool,

    /// Require state, app id and PKCE verifier together at exchange time
    #[serde(default)]
    pub double_verification: bool,

    /// When the client was registered
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Create an active client allowed to use the authorization-code and
    /// refresh-token grants.
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            name: client_id.clone(),
            client_id,
            secret: secret.into(),
            redirect_uris: vec![redirect_uri.into()],
            grant_types: vec![GRANT_AUTHORIZATION_CODE.to_string(), GRANT_REFRESH_TOKEN.to_string()],
            scopes: Vec::new(),
            auto_approve: false,
            is_active: true,
            internal_auth: false,
            double_verification: false,
            created_at: Utc::now(),
        }
    }

    /// Replace the allowed grant types.
    pub fn with_grant_types<I, S>(mut self, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant_types = grants.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the allowed scopes.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the client as a first-party app requiring double verification.
    pub fn with_double_verification(mut self) -> Self {
        self.internal_auth = true;
        self.double_verification = true;
        self
    }

    /// Deactivate the client.
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether exchange must check state, app id and verifier together.
    pub fn requires_double_verification(&self) -> bool {
        self.internal_auth && self.double_verification
    }

    /// A redirect URI is allowed when it starts with a registered value.
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris
            .iter()
            .any(|allowed| allowed == "*" || redirect_uri.starts_with(allowed.as_str()))
    }

    /// Every space-separated scope must be registered (empty registration allows all).
    pub fn allows_scope(&self, scope: &str) -> bool {
        if self.scopes.is_empty() {
            return true;
        }
        scope
            .split_whitespace()
            .all(|s| self.scopes.iter().any(|allowed| allowed == s))
    }

    /// Whether the client may use `grant_type`.
    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    /// Constant-time secret comparison.
    pub fn verify_secret(&self, secret: &str) -> bool {
        !self.secret.is_empty() && bool::from(self.secret.as_bytes().ct_eq(secret.as_bytes()))
    }

    /// Scope granted when the request names none.
    pub fn default_scope(&self) -> String {
        if self.scopes.is_empty() {
            "openid profile".to_string()
        } else {
            self.scopes.join(" ")
        }
    }
}

/// Storage for registered clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Look a client up by id. Inactive clients are returned too.
    async fn find(&self, client_id: &str) -> AuthResult<Option<OAuthClient>>;

    /// Add or replace a client.
    async fn register(&self, client: OAuthClient) -> AuthResult<()>;
}

/// In-memory client registry.
#[derive(Debug, Default)]
pub struct MemoryClientRegistry {
    clients: RwLock<HashMap<String, OAuthClient>>,
}

impl MemoryClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn find(&self, client_id: &str) -> AuthResult<Option<OAuthClient>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn register(&self, client: OAuthClient) -> AuthResult<()> {
        self.clients.write().await.insert(client.client_id.clone(), client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_prefix_matching() {
        let client = OAuthClient::new("c1", "s", "https://app.example.com/cb");
        assert!(client.allows_redirect("https://app.example.com/cb"));
        assert!(client.allows_redirect("https://app.example.com/cb?next=/home"));
        assert!(!client.allows_redirect("https://evil.example.com/cb"));

        let mut wildcard = client.clone();
        wildcard.redirect_uris = vec!["*".into()];
        assert!(wildcard.allows_redirect("https://anything.example.org/"));
    }

    #[test]
    fn test_scope_subset() {
        let open = OAuthClient::new("c1", "s", "https://app/cb");
        assert!(open.allows_scope("openid anything"));

        let restricted = open.with_scopes(["openid", "profile"]);
        assert!(restricted.allows_scope("openid profile"));
        assert!(restricted.allows_scope("openid"));
        assert!(!restricted.allows_scope("openid email"));
        assert_eq!(restricted.default_scope(), "openid profile");
    }

    #[test]
    fn test_secret_and_grants() {
        let client = OAuthClient::new("c1", "s3cret", "https://app/cb");
        assert!(client.verify_secret("s3cret"));
        assert!(!client.verify_secret("s3cre"));
        assert!(!client.verify_secret(""));
        assert!(client.allows_grant(GRANT_AUTHORIZATION_CODE));
        assert!(!client.allows_grant(GRANT_CLIENT_CREDENTIALS));

        let client = client.with_double_verification();
        assert!(client.requires_double_verification());
    }

    #[tokio::test]
    async fn test_memory_registry() {
        let registry = MemoryClientRegistry::new();
        registry
            .register(OAuthClient::new("c1", "s", "https://app/cb"))
            .await
            .unwrap();
        assert!(registry.find("c1").await.unwrap().is_some());
        assert!(registry.find("c2").await.unwrap().is_none());
    }
}
