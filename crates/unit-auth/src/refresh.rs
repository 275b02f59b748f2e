//! Refresh token rotation
//!
//! Refresh tokens are single use. Each successful refresh revokes the
//! presented token and stores its replacement in one atomic step, so two
//! concurrent refreshes with the same token cannot both succeed.
//!
//! Only a SHA-256 digest of each raw token is persisted. Lookups compare
//! digests in constant time.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use unit_org::Principal;
use uuid::Uuid;

use crate::claims::TokenType;
use crate::directory::UserDirectory;
use crate::error::{AuthError, AuthResult};
use crate::issuer::{TokenIssuer, TokenPair};
use crate::validator::TokenValidator;

/// Where a refresh token was issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    /// Client IP address
    pub ip: Option<String>,

    /// Client user agent
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Create client info.
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Hash a raw refresh token for storage.
pub fn hash_token(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw.as_bytes()))
}

/// A persisted refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    /// Record id
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// SHA-256 of the raw token (base64url)
    pub token_hash: String,

    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,

    /// Whether the token was revoked
    pub revoked: bool,

    /// When the token was revoked
    pub revoked_at: Option<DateTime<Utc>>,

    /// IP the token was issued to
    pub created_from_ip: Option<String>,

    /// User agent the token was issued to
    pub user_agent: Option<String>,

    /// When the token was issued
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Create a record for a raw token. The raw value is not retained.
    pub fn new(user_id: impl Into<String>, raw: &str, ttl: Duration, client: &ClientInfo) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            token_hash: hash_token(raw),
            expires_at: now + ttl,
            revoked: false,
            revoked_at: None,
            created_from_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
        }
    }

    /// Whether the record is past its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the token can still be exchanged.
    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }

    /// Constant-time check of a raw token against the stored digest.
    pub fn matches(&self, raw: &str) -> bool {
        let candidate = hash_token(raw);
        candidate.as_bytes().ct_eq(self.token_hash.as_bytes()).into()
    }

    /// Mark the record revoked.
    pub fn revoke(&mut self) {
        self.revoked = true;
        self.revoked_at = Some(Utc::now());
    }
}

/// Persistence for refresh token records.
///
/// Implementations must make [`RefreshTokenRepository::rotate`] and
/// [`RefreshTokenRepository::revoke_if_active`] conditional on the record not
/// being revoked yet (a transaction or `UPDATE ... WHERE revoked = false`).
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Store a new record.
    async fn insert(&self, record: RefreshTokenRecord) -> AuthResult<()>;

    /// Every record of a user, including revoked and expired ones.
    async fn find_by_user(&self, user_id: &str) -> AuthResult<Vec<RefreshTokenRecord>>;

    /// Revoke `id` if it is still active. Returns whether this call revoked it.
    async fn revoke_if_active(&self, id: &str) -> AuthResult<bool>;

    /// Revoke `id` and store `replacement` atomically.
    ///
    /// Returns `false`, storing nothing, when `id` was already revoked.
    async fn rotate(&self, id: &str, replacement: RefreshTokenRecord) -> AuthResult<bool>;

    /// Revoke every active record of a user. Returns how many were revoked.
    async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize>;

    /// Revoke every active record of `replacement`'s user and store
    /// `replacement`, atomically. Returns how many were revoked.
    async fn replace_for_user(&self, replacement: RefreshTokenRecord) -> AuthResult<usize>;

    /// Delete records that expired before `now`. Returns how many were deleted.
    async fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<usize>;
}

/// In-memory refresh token repository.
///
/// Every conditional update runs under one write lock.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenRepository {
    records: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn insert(&self, record: RefreshTokenRecord) -> AuthResult<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str) -> AuthResult<Vec<RefreshTokenRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke_if_active(&self, id: &str) -> AuthResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) if !record.revoked => {
                record.revoke();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate(&self, id: &str, replacement: RefreshTokenRecord) -> AuthResult<bool> {
        let mut records = self.records.write().await;
        let revoked = match records.get_mut(id) {
            Some(record) if !record.revoked => {
                record.revoke();
                true
            }
            _ => false,
        };
        if revoked {
            records.insert(replacement.id.clone(), replacement);
        }
        Ok(revoked)
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let mut records = self.records.write().await;
        let mut count = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoke();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn replace_for_user(&self, replacement: RefreshTokenRecord) -> AuthResult<usize> {
        let mut records = self.records.write().await;
        let mut count = 0;
        for record in records.values_mut() {
            if record.user_id == replacement.user_id && !record.revoked {
                record.revoke();
                count += 1;
            }
        }
        records.insert(replacement.id.clone(), replacement);
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        Ok(before - records.len())
    }
}

/// Refresh token lifecycle: creation, rotation, revocation and cleanup.
#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn RefreshTokenRepository>,
    issuer: TokenIssuer,
    validator: TokenValidator,
    directory: Option<Arc<dyn UserDirectory>>,
}

impl std::fmt::Debug for RefreshTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenStore")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl RefreshTokenStore {
    /// Create a store.
    pub fn new(
        repository: Arc<dyn RefreshTokenRepository>,
        issuer: TokenIssuer,
        validator: TokenValidator,
    ) -> Self {
        Self {
            repository,
            issuer,
            validator,
            directory: None,
        }
    }

    /// Reload the principal on rotation: disabled users are refused and the
    /// current role is used instead of the one in the old token.
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Persist the digest of a freshly issued refresh token.
    #[instrument(skip(self, raw))]
    pub async fn create(&self, user_id: &str, raw: &str, client: &ClientInfo) -> AuthResult<RefreshTokenRecord> {
        let record = RefreshTokenRecord::new(user_id, raw, self.issuer.ttl(TokenType::Refresh), client);
        self.repository.insert(record.clone()).await?;
        debug!(record_id = %record.id, "Refresh token stored");
        Ok(record)
    }

    /// Non-revoked, non-expired records of a user.
    pub async fn find_active_by_user(&self, user_id: &str) -> AuthResult<Vec<RefreshTokenRecord>> {
        let records = self.repository.find_by_user(user_id).await?;
        Ok(records.into_iter().filter(RefreshTokenRecord::is_active).collect())
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// The presented token's record is revoked and the replacement stored in
    /// one step. Fails with [`AuthError::NoMatchingToken`] when no active
    /// record of `user_id` matches, including when a concurrent rotation of
    /// the same token won.
    #[instrument(skip(self, raw))]
    pub async fn consume_and_rotate(&self, user_id: &str, raw: &str, client: &ClientInfo) -> AuthResult<TokenPair> {
        let claims = self.validator.validate_type(raw, TokenType::Refresh)?;
        if claims.sub != user_id {
            warn!("Refresh token subject does not match user");
            return Err(AuthError::NoMatchingToken);
        }

        let active = self.find_active_by_user(user_id).await?;
        let Some(matched) = active.iter().find(|r| r.matches(raw)) else {
            warn!("No active refresh token matched");
            return Err(AuthError::NoMatchingToken);
        };

        let (identifier, role) = match &self.directory {
            Some(directory) => {
                let principal = directory
                    .find_by_id(user_id)
                    .await?
                    .ok_or(AuthError::UserNotFound)?;
                if !principal.is_active() {
                    return Err(AuthError::AccountDisabled);
                }
                (principal.login_identifier().to_string(), principal.role)
            }
            None => (claims.identifier, claims.role),
        };

        let pair = self.issuer.issue_token_pair(user_id, &identifier, &role)?;
        let replacement = RefreshTokenRecord::new(
            user_id,
            &pair.refresh_token,
            self.issuer.ttl(TokenType::Refresh),
            client,
        );

        if !self.repository.rotate(&matched.id, replacement).await? {
            warn!(record_id = %matched.id, "Refresh token rotated concurrently");
            return Err(AuthError::NoMatchingToken);
        }

        info!(record_id = %matched.id, "Refresh token rotated");
        Ok(pair)
    }

    /// Revoke every active refresh token of a user.
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: &str) -> AuthResult<usize> {
        let count = self.repository.revoke_all_for_user(user_id).await?;
        info!(count, "Revoked refresh tokens");
        Ok(count)
    }

    /// Revoke a single refresh token (logout).
    #[instrument(skip(self, raw))]
    pub async fn revoke(&self, user_id: &str, raw: &str) -> AuthResult<()> {
        let records = self.repository.find_by_user(user_id).await?;
        let record = records
            .iter()
            .find(|r| r.matches(raw))
            .ok_or(AuthError::NoMatchingToken)?;

        if record.revoked || !self.repository.revoke_if_active(&record.id).await? {
            return Err(AuthError::AlreadyRevoked);
        }
        info!(record_id = %record.id, "Refresh token revoked");
        Ok(())
    }

    /// Delete expired records. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> AuthResult<usize> {
        let deleted = self.repository.delete_expired(Utc::now()).await?;
        if deleted > 0 {
            info!(deleted, "Expired refresh tokens deleted");
        }
        Ok(deleted)
    }

    /// Log a user in with a token pair, ending any other session.
    ///
    /// Prior refresh tokens of the user are revoked and the new one stored
    /// in a single repository step, so concurrent logins still leave exactly
    /// one active.
    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn login_with_token_pair(&self, principal: &Principal, client: &ClientInfo) -> AuthResult<TokenPair> {
        if !principal.is_active() {
            return Err(AuthError::AccountDisabled);
        }

        let pair = self
            .issuer
            .issue_token_pair(&principal.id, principal.login_identifier(), &principal.role)?;
        let record = RefreshTokenRecord::new(
            &principal.id,
            &pair.refresh_token,
            self.issuer.ttl(TokenType::Refresh),
            client,
        );
        let record_id = record.id.clone();
        let revoked = self.repository.replace_for_user(record).await?;
        info!(record_id = %record_id, revoked, "Login replaced refresh tokens");
        Ok(pair)
    }

    /// Extend an access or remember-me token (`Authorization: Bearer`).
    ///
    /// Returns a token of the same variant with a fresh lifetime.
    pub async fn refresh_access_token(&self, bearer: &str) -> AuthResult<String> {
        let claims = self.validator.validate_active(bearer, None).await?;
        self.issuer.reissue(&claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUserDirectory;
    use crate::issuer::testing::issuer;
    use crate::validator::testing::validator;
    use unit_org::PrincipalStatus;

    fn store() -> RefreshTokenStore {
        RefreshTokenStore::new(Arc::new(MemoryRefreshTokenRepository::new()), issuer(), validator())
    }

    fn user() -> Principal {
        Principal::new("u1", "user").with_email("u1@example.com")
    }

    #[test]
    fn test_record_never_holds_raw_token() {
        let record = RefreshTokenRecord::new("u1", "raw-token-value", Duration::hours(1), &ClientInfo::default());
        assert_ne!(record.token_hash, "raw-token-value");
        assert!(record.matches("raw-token-value"));
        assert!(!record.matches("raw-token-valuf"));
        assert!(record.is_active());
    }

    #[tokio::test]
    async fn test_create_and_find_active() {
        let store = store();
        let client = ClientInfo::new("10.0.0.1", "tests");
        let raw = issuer().issue_refresh("u1", "u1@example.com", "user").unwrap();

        let record = store.create("u1", &raw, &client).await.unwrap();
        assert_eq!(record.created_from_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(store.find_active_by_user("u1").await.unwrap().len(), 1);
        assert!(store.find_active_by_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_is_single_use() {
        let store = store();
        let pair = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();

        let rotated = store
            .consume_and_rotate("u1", &pair.refresh_token, &ClientInfo::default())
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);

        let replay = store
            .consume_and_rotate("u1", &pair.refresh_token, &ClientInfo::default())
            .await;
        assert!(matches!(replay, Err(AuthError::NoMatchingToken)));

        let active = store.find_active_by_user("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].matches(&rotated.refresh_token));
    }

    #[tokio::test]
    async fn test_access_token_cannot_rotate() {
        let store = store();
        let pair = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();
        let result = store
            .consume_and_rotate("u1", &pair.access_token, &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::WrongTokenType { .. })));
    }

    #[tokio::test]
    async fn test_other_users_token_rejected() {
        let store = store();
        let pair = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();
        let result = store
            .consume_and_rotate("u2", &pair.refresh_token, &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::NoMatchingToken)));
    }

    #[tokio::test]
    async fn test_login_enforces_single_session() {
        let store = store();
        let first = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();
        let second = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();

        let active = store.find_active_by_user("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].matches(&second.refresh_token));

        let result = store
            .consume_and_rotate("u1", &first.refresh_token, &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::NoMatchingToken)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_leave_one_active_token() {
        let store = store();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.login_with_token_pair(&user(), &ClientInfo::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.find_active_by_user("u1").await.unwrap().len(), 1);
        let all = store.repository.find_by_user("u1").await.unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all.iter().filter(|r| r.revoked).count(), 7);
    }

    #[tokio::test]
    async fn test_revoke_single_token() {
        let store = store();
        let pair = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();

        store.revoke("u1", &pair.refresh_token).await.unwrap();
        assert!(matches!(
            store.revoke("u1", &pair.refresh_token).await,
            Err(AuthError::AlreadyRevoked)
        ));
        assert!(matches!(
            store.revoke("u1", "unknown").await,
            Err(AuthError::NoMatchingToken)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let repository = Arc::new(MemoryRefreshTokenRepository::new());
        let store = RefreshTokenStore::new(repository.clone(), issuer(), validator());

        let expired = RefreshTokenRecord::new("u1", "old", Duration::seconds(-1), &ClientInfo::default());
        repository.insert(expired).await.unwrap();
        store.create("u1", "fresh", &ClientInfo::default()).await.unwrap();

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);
        assert_eq!(repository.find_by_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_user_cannot_rotate() {
        let directory = Arc::new(MemoryUserDirectory::new());
        directory.insert(user(), "pw").await;
        let store = store().with_directory(directory.clone());

        let pair = store.login_with_token_pair(&user(), &ClientInfo::default()).await.unwrap();
        directory
            .insert(user().with_status(PrincipalStatus::Disabled), "pw")
            .await;

        let result = store
            .consume_and_rotate("u1", &pair.refresh_token, &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::AccountDisabled)));
    }

    #[tokio::test]
    async fn test_refresh_access_token_keeps_variant() {
        let store = store();
        let issuer = issuer();
        let validator = validator();

        let remember = issuer.issue_remember_me("u1", "u1@example.com", "user").unwrap();
        let extended = store.refresh_access_token(&remember).await.unwrap();
        assert_eq!(validator.validate(&extended).unwrap().token_type, TokenType::RememberMe);

        let refresh = issuer.issue_refresh("u1", "u1@example.com", "user").unwrap();
        assert!(store.refresh_access_token(&refresh).await.is_err());
    }
}
