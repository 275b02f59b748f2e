//! Session registry
//!
//! Two stores back explicit revocation and SSO auditing:
//! - [`TokenBlacklist`]: `jti`s that must be rejected before their natural
//!   expiry (logout, revoke endpoint, rotated OAuth refresh tokens, consumed
//!   authorization codes)
//! - [`SsoSessionStore`]: sessions created through the authorization-code flow
//!
//! Both are traits so a persistent backend can replace the in-memory
//! implementations provided here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Store of revoked token ids.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Revoke `jti` until `expires_at`.
    async fn insert(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<()>;

    /// Insert `jti` unless it is already present.
    ///
    /// Returns `true` if this call inserted it. The check and the insert
    /// must be atomic.
    async fn insert_if_absent(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<bool>;

    /// Whether `jti` is revoked and the entry has not expired.
    async fn contains(&self, jti: &str) -> AuthResult<bool>;

    /// Delete entries past their expiry; returns how many were removed.
    async fn purge_expired(&self) -> AuthResult<usize>;
}

/// In-memory blacklist.
///
/// Suitable for single-process deployments and testing.
#[derive(Debug, Default)]
pub struct MemoryTokenBlacklist {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTokenBlacklist {
    /// Create an empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MemoryTokenBlacklist {
    async fn insert(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<()> {
        self.entries.write().await.insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn insert_if_absent(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        match entries.get(jti) {
            Some(existing) if *existing > now => Ok(false),
            _ => {
                entries.insert(jti.to_string(), expires_at);
                Ok(true)
            }
        }
    }

    async fn contains(&self, jti: &str) -> AuthResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries.get(jti).is_some_and(|exp| *exp > Utc::now()))
    }

    async fn purge_expired(&self) -> AuthResult<usize> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, exp| *exp > now);
        Ok(before - entries.len())
    }
}

/// An SSO session established through the authorization-code flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsoSession {
    /// Session id
    pub id: String,

    /// Central user id
    pub user_id: String,

    /// OAuth client id
    pub client_id: String,

    /// Granted scope
    pub scope: String,

    /// PKCE challenge presented at authorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE challenge method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Hash of the current access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_hash: Option<String>,

    /// Hash of the current refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_hash: Option<String>,

    /// Session end
    pub expires_at: DateTime<Utc>,

    /// Whether the session was ended
    pub revoked: bool,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Last time a token was issued or checked for the session
    pub last_activity: DateTime<Utc>,
}

impl SsoSession {
    /// Create a new session.
    pub fn new(
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            client_id: client_id.into(),
            scope: scope.into(),
            code_challenge: None,
            code_challenge_method: None,
            access_token_hash: None,
            refresh_token_hash: None,
            expires_at,
            revoked: false,
            created_at: now,
            last_activity: now,
        }
    }

    /// Attach the PKCE challenge.
    pub fn with_pkce(mut self, challenge: Option<String>, method: Option<String>) -> Self {
        self.code_challenge = challenge;
        self.code_challenge_method = method;
        self
    }

    /// Whether the session is still usable.
    pub fn is_active(&self) -> bool {
        !self.revoked && self.expires_at > Utc::now()
    }
}

/// Store of SSO sessions.
#[async_trait]
pub trait SsoSessionStore: Send + Sync {
    /// Persist a new session.
    async fn insert(&self, session: SsoSession) -> AuthResult<()>;

    /// Fetch a session by id.
    async fn get(&self, id: &str) -> AuthResult<Option<SsoSession>>;

    /// Replace a stored session.
    async fn update(&self, session: SsoSession) -> AuthResult<()>;

    /// All sessions of a user, newest first.
    async fn list_by_user(&self, user_id: &str) -> AuthResult<Vec<SsoSession>>;

    /// Delete sessions that ended before now; returns how many were removed.
    async fn purge_expired(&self) -> AuthResult<usize>;
}

/// In-memory SSO session store.
#[derive(Debug, Default)]
pub struct MemorySsoSessionStore {
    sessions: RwLock<HashMap<String, SsoSession>>,
}

impl MemorySsoSessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SsoSessionStore for MemorySsoSessionStore {
    async fn insert(&self, session: SsoSession) -> AuthResult<()> {
        self.sessions.write().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> AuthResult<Option<SsoSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update(&self, session: SsoSession) -> AuthResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(AuthError::InvalidRequest(format!("unknown session {}", session.id)));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> AuthResult<Vec<SsoSession>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<SsoSession> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn purge_expired(&self) -> AuthResult<usize> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}

/// Blacklist and SSO session tracking behind one handle.
#[derive(Clone)]
pub struct SessionRegistry {
    blacklist: Arc<dyn TokenBlacklist>,
    sessions: Arc<dyn SsoSessionStore>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionRegistry {
    /// Create a registry over the given stores.
    pub fn new(blacklist: Arc<dyn TokenBlacklist>, sessions: Arc<dyn SsoSessionStore>) -> Self {
        Self { blacklist, sessions }
    }

    /// Registry backed by in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryTokenBlacklist::new()),
            Arc::new(MemorySsoSessionStore::new()),
        )
    }

    /// Revoke a token id until its natural expiry.
    #[instrument(skip(self))]
    pub async fn blacklist(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<()> {
        if expires_at <= Utc::now() {
            debug!("Token already expired, not blacklisting");
            return Ok(());
        }
        self.blacklist.insert(jti, expires_at).await?;
        info!("Token blacklisted");
        Ok(())
    }

    /// Whether a token id has been revoked.
    pub async fn is_blacklisted(&self, jti: &str) -> AuthResult<bool> {
        self.blacklist.contains(jti).await
    }

    /// Record a one-time identifier; returns `false` if it was seen before.
    ///
    /// Backs single-use authorization codes: the code's `jti` is recorded
    /// until the code itself expires.
    #[instrument(skip(self))]
    pub async fn consume_once(&self, jti: &str, expires_at: DateTime<Utc>) -> AuthResult<bool> {
        self.blacklist.insert_if_absent(jti, expires_at).await
    }

    /// Open an SSO session.
    #[instrument(skip(self, session), fields(user_id = %session.user_id, client_id = %session.client_id))]
    pub async fn open_session(&self, session: SsoSession) -> AuthResult<SsoSession> {
        self.sessions.insert(session.clone()).await?;
        debug!(session_id = %session.id, "SSO session opened");
        Ok(session)
    }

    /// Fetch a session.
    pub async fn find_session(&self, id: &str) -> AuthResult<Option<SsoSession>> {
        self.sessions.get(id).await
    }

    /// Record the hashes of the tokens currently issued for a session.
    pub async fn record_tokens(
        &self,
        session_id: &str,
        access_token_hash: Option<String>,
        refresh_token_hash: Option<String>,
    ) -> AuthResult<()> {
        let Some(mut session) = self.sessions.get(session_id).await? else {
            return Ok(());
        };
        session.access_token_hash = access_token_hash;
        if refresh_token_hash.is_some() {
            session.refresh_token_hash = refresh_token_hash;
        }
        session.last_activity = Utc::now();
        self.sessions.update(session).await
    }

    /// Bump the last-activity timestamp.
    pub async fn touch(&self, session_id: &str) -> AuthResult<()> {
        if let Some(mut session) = self.sessions.get(session_id).await? {
            session.last_activity = Utc::now();
            self.sessions.update(session).await?;
        }
        Ok(())
    }

    /// End a session.
    #[instrument(skip(self))]
    pub async fn end_session(&self, session_id: &str) -> AuthResult<()> {
        if let Some(mut session) = self.sessions.get(session_id).await? {
            session.revoked = true;
            self.sessions.update(session).await?;
            info!("SSO session ended");
        }
        Ok(())
    }

    /// Active sessions of a user.
    pub async fn sessions_for_user(&self, user_id: &str) -> AuthResult<Vec<SsoSession>> {
        let sessions = self.sessions.list_by_user(user_id).await?;
        Ok(sessions.into_iter().filter(SsoSession::is_active).collect())
    }

    /// Drop expired blacklist entries and sessions.
    ///
    /// Idempotent; meant to be called by an external scheduler.
    pub async fn purge_expired(&self) -> AuthResult<usize> {
        let tokens = self.blacklist.purge_expired().await?;
        let sessions = self.sessions.purge_expired().await?;
        Ok(tokens + sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_blacklist_lifecycle() {
        let registry = SessionRegistry::in_memory();
        let exp = Utc::now() + Duration::hours(1);

        assert!(!registry.is_blacklisted("jti-1").await.unwrap());
        registry.blacklist("jti-1", exp).await.unwrap();
        assert!(registry.is_blacklisted("jti-1").await.unwrap());
        assert!(!registry.is_blacklisted("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_are_garbage() {
        let blacklist = MemoryTokenBlacklist::new();
        blacklist
            .insert("old", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        blacklist
            .insert("new", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(!blacklist.contains("old").await.unwrap());
        assert_eq!(blacklist.purge_expired().await.unwrap(), 1);
        assert_eq!(blacklist.purge_expired().await.unwrap(), 0);
        assert!(blacklist.contains("new").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_once() {
        let registry = SessionRegistry::in_memory();
        let exp = Utc::now() + Duration::minutes(10);

        assert!(registry.consume_once("code-1", exp).await.unwrap());
        assert!(!registry.consume_once("code-1", exp).await.unwrap());
        assert!(registry.consume_once("code-2", exp).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let registry = SessionRegistry::in_memory();
        let session = SsoSession::new("u1", "client-1", "openid", Utc::now() + Duration::hours(24))
            .with_pkce(Some("challenge".to_string()), Some("S256".to_string()));
        let session = registry.open_session(session).await.unwrap();

        registry
            .record_tokens(&session.id, Some("a-hash".to_string()), Some("r-hash".to_string()))
            .await
            .unwrap();
        let stored = registry.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token_hash.as_deref(), Some("a-hash"));
        assert_eq!(stored.refresh_token_hash.as_deref(), Some("r-hash"));

        assert_eq!(registry.sessions_for_user("u1").await.unwrap().len(), 1);
        registry.end_session(&session.id).await.unwrap();
        assert!(registry.sessions_for_user("u1").await.unwrap().is_empty());
    }
}
