//! Project domain models
//!
//! Projects are the downstream applications that delegate login to the
//! identity service. Each project exposes a user-provisioning API that the
//! federation mapper calls the first time a central user logs in through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default timeout for calls to a project's API, in milliseconds.
pub const DEFAULT_PROJECT_TIMEOUT_MS: u64 = 5_000;

/// A subscribing project.
///
/// # Examples
///
/// ```
/// use unit_org::{AuthMode, Project};
///
/// let project = Project::new("notes", "Notes", "https://notes.example.com")
///     .with_auth(AuthMode::ApiKey, "secret-token");
/// assert!(project.enabled);
/// assert_eq!(project.url("/api/v1/users"), "https://notes.example.com/api/v1/users");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project key, sent by clients in the `X-Genres-Type` header
    pub key: String,

    /// Human-readable name
    pub name: String,

    /// Base URL of the project's API
    pub base_url: String,

    /// How the service authenticates to the project's API
    pub auth_mode: AuthMode,

    /// Credential for `auth_mode` (API key or bearer token)
    #[serde(skip_serializing)]
    pub credentials: Option<String>,

    /// Outbound call timeout in milliseconds
    pub timeout_ms: u64,

    /// Whether logins through this project are accepted
    pub enabled: bool,

    /// When the project was registered
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creates an enabled project with no outbound authentication.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            base_url: base_url.into(),
            auth_mode: AuthMode::None,
            credentials: None,
            timeout_ms: DEFAULT_PROJECT_TIMEOUT_MS,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Set the outbound authentication mode and credential.
    pub fn with_auth(mut self, mode: AuthMode, credentials: impl Into<String>) -> Self {
        self.auth_mode = mode;
        self.credentials = Some(credentials.into());
        self
    }

    /// Set the outbound timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Mark the project disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Outbound timeout, falling back to the default when unset.
    pub fn timeout(&self) -> std::time::Duration {
        let ms = if self.timeout_ms == 0 {
            DEFAULT_PROJECT_TIMEOUT_MS
        } else {
            self.timeout_ms
        };
        std::time::Duration::from_millis(ms)
    }

    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// Authentication used when calling a project's API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No credentials are sent
    #[default]
    None,

    /// Credential sent in the `X-Project-Token` header
    ApiKey,

    /// Credential sent as `Authorization: Bearer`
    Bearer,
}

impl AuthMode {
    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" | "none" => Some(AuthMode::None),
            "api_key" | "apikey" => Some(AuthMode::ApiKey),
            "bearer" => Some(AuthMode::Bearer),
            _ => None,
        }
    }
}

/// User payload sent to a project's provisioning endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundUser {
    /// Central user id
    pub user_id: String,

    /// Email address (may be empty)
    pub email: String,

    /// Username (may be empty)
    pub username: String,

    /// Display name
    pub nickname: String,

    /// Avatar URL
    pub avatar: String,
}

impl From<&crate::Principal> for OutboundUser {
    fn from(p: &crate::Principal) -> Self {
        Self {
            user_id: p.id.clone(),
            email: p.email.clone().unwrap_or_default(),
            username: p.username.clone().unwrap_or_default(),
            nickname: p.nickname.clone(),
            avatar: p.avatar.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Principal;

    #[test]
    fn test_project_defaults() {
        let project = Project::new("notes", "Notes", "http://localhost:3001/");
        assert!(project.enabled);
        assert_eq!(project.auth_mode, AuthMode::None);
        assert_eq!(project.timeout(), std::time::Duration::from_secs(5));
        assert_eq!(project.url("api/v1/users"), "http://localhost:3001/api/v1/users");
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let project = Project::new("notes", "Notes", "http://localhost").with_timeout_ms(0);
        assert_eq!(project.timeout(), std::time::Duration::from_millis(5_000));
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!(AuthMode::parse("api_key"), Some(AuthMode::ApiKey));
        assert_eq!(AuthMode::parse("Bearer"), Some(AuthMode::Bearer));
        assert_eq!(AuthMode::parse(""), Some(AuthMode::None));
        assert_eq!(AuthMode::parse("hmac"), None);
    }

    #[test]
    fn test_credentials_not_serialized() {
        let project = Project::new("notes", "Notes", "http://localhost")
            .with_auth(AuthMode::ApiKey, "secret");
        let json = serde_json::to_value(&project).unwrap();
        assert!(json.get("credentials").is_none());
        assert_eq!(json["auth_mode"], "api_key");
    }

    #[test]
    fn test_outbound_user_from_principal() {
        let user = Principal::new("u1", "user")
            .with_email("u1@example.com")
            .with_nickname("U One");
        let outbound = OutboundUser::from(&user);
        assert_eq!(outbound.user_id, "u1");
        assert_eq!(outbound.email, "u1@example.com");
        assert_eq!(outbound.username, "");
        assert_eq!(outbound.nickname, "U One");
    }
}
