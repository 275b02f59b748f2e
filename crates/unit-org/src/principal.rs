//! Principal domain model
//!
//! A principal is the central user identity. The user-management subsystem
//! owns these records; the token engine only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Central user identity as seen by the token engine.
///
/// The `id` never changes. `role` and `status` may be changed by an
/// administrator at any time, so tokens carry a snapshot of the role at
/// issuance time.
///
/// # Examples
///
/// ```
/// use unit_org::Principal;
///
/// let user = Principal::new("u1", "user").with_email("u1@example.com");
/// assert_eq!(user.login_identifier(), "u1@example.com");
/// assert!(user.is_active());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    /// Immutable unique identifier
    pub id: String,

    /// Email address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Phone number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Display name
    #[serde(default)]
    pub nickname: String,

    /// Avatar URL
    #[serde(default)]
    pub avatar: String,

    /// Role name (for example `user` or `admin`)
    pub role: String,

    /// Account status
    pub status: PrincipalStatus,

    /// Whether the email address was verified
    #[serde(default)]
    pub email_verified: bool,

    /// Whether the phone number was verified
    #[serde(default)]
    pub phone_verified: bool,

    /// When the account was created
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Create an active principal with the given id and role.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
            username: None,
            nickname: String::new(),
            avatar: String::new(),
            role: role.into(),
            status: PrincipalStatus::Active,
            email_verified: false,
            phone_verified: false,
            created_at: Utc::now(),
        }
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the phone number.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the display name.
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: PrincipalStatus) -> Self {
        self.status = status;
        self
    }

    /// The identifier embedded in tokens: email, then phone, then username,
    /// then the id itself.
    pub fn login_identifier(&self) -> &str {
        self.email
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.phone.as_deref().filter(|s| !s.is_empty()))
            .or_else(|| self.username.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.id)
    }

    /// Preferred username for OIDC userinfo.
    pub fn preferred_username(&self) -> &str {
        self.username
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.login_identifier())
    }

    /// Whether the principal may log in.
    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }
}

/// Account status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalStatus {
    /// Account can authenticate
    #[default]
    Active,

    /// Account is administratively disabled
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_identifier_precedence() {
        let user = Principal::new("u1", "user");
        assert_eq!(user.login_identifier(), "u1");

        let user = user.with_username("alice");
        assert_eq!(user.login_identifier(), "alice");

        let user = user.with_phone("+15550100");
        assert_eq!(user.login_identifier(), "+15550100");

        let user = user.with_email("alice@example.com");
        assert_eq!(user.login_identifier(), "alice@example.com");
        assert_eq!(user.preferred_username(), "alice");
    }

    #[test]
    fn test_empty_email_is_skipped() {
        let user = Principal::new("u2", "user")
            .with_email("")
            .with_phone("+15550101");
        assert_eq!(user.login_identifier(), "+15550101");
    }

    #[test]
    fn test_status() {
        let user = Principal::new("u3", "admin").with_status(PrincipalStatus::Disabled);
        assert!(!user.is_active());

        let json = serde_json::to_value(PrincipalStatus::Disabled).unwrap();
        assert_eq!(json, "disabled");
    }
}
