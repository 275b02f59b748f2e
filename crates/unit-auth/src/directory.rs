//! Read access to principals.
//!
//! User management lives outside the engine. The engine needs two things
//! from it: load a principal by id, and check a username/password pair for
//! the `password` grant.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use unit_org::Principal;

use crate::error::{AuthError, AuthResult};

/// Lookup of central user identities.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Load a principal by id.
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<Principal>>;

    /// Load a principal by email, phone or username.
    async fn find_by_identifier(&self, identifier: &str) -> AuthResult<Option<Principal>>;

    /// Check credentials and return the principal they belong to.
    ///
    /// `username` may be any login identifier (email, phone, username).
    /// Fails with [`AuthError::InvalidCredentials`] on a mismatch.
    async fn verify_credentials(&self, username: &str, password: &str) -> AuthResult<Principal>;
}

/// In-memory directory for tests and local development.
///
/// Passwords are kept as SHA-256 digests; production deployments plug in a
/// directory backed by the user-management service instead.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, (Principal, [u8; 32])>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub async fn insert(&self, principal: Principal, password: &str) {
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        self.users
            .write()
            .await
            .insert(principal.id.clone(), (principal, digest));
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<Principal>> {
        Ok(self.users.read().await.get(user_id).map(|(p, _)| p.clone()))
    }

    async fn find_by_identifier(&self, identifier: &str) -> AuthResult<Option<Principal>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|(p, _)| has_identifier(p, identifier))
            .map(|(p, _)| p.clone()))
    }

    async fn verify_credentials(&self, username: &str, password: &str) -> AuthResult<Principal> {
        let users = self.users.read().await;
        let (principal, stored) = users
            .values()
            .find(|(p, _)| p.id == username || has_identifier(p, username))
            .ok_or(AuthError::InvalidCredentials)?;

        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        if !bool::from(digest[..].ct_eq(&stored[..])) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(principal.clone())
    }
}

fn has_identifier(p: &Principal, identifier: &str) -> bool {
    p.email.as_deref() == Some(identifier)
        || p.phone.as_deref() == Some(identifier)
        || p.username.as_deref() == Some(identifier)
}
