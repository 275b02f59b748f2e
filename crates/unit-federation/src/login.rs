//! Federated login.
//!
//! After a login handler has authenticated a user, it hands the principal
//! and the requesting project's key to [`FederatedLogin::login`]. The
//! resulting token carries `project_key` and `local_user_id` when the user
//! could be mapped into the project.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use unit_auth::{AuthError, TokenIssuer};
use unit_org::Principal;

use crate::config::FederationConfig;
use crate::error::{FederationError, FederationResult};
use crate::mapper::IdentityFederationMapper;

/// Header naming the requesting project.
pub const PROJECT_HEADER: &str = "X-Genres-Type";

/// Query parameter fallback for [`PROJECT_HEADER`].
pub const PROJECT_QUERY_PARAM: &str = "genres-type";

/// What a login does when the user cannot be mapped into the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingPolicy {
    /// The login fails
    #[default]
    Strict,

    /// The login succeeds with a token that has no project claims
    BestEffort,
}

/// Project key of a request: the [`PROJECT_HEADER`] header, else the
/// [`PROJECT_QUERY_PARAM`] query parameter.
///
/// Header names match case-insensitively; blank values count as absent.
///
/// ```
/// use unit_federation::project_key_from_request;
///
/// let headers = [("x-genres-type", "notes")];
/// assert_eq!(project_key_from_request(headers, None).as_deref(), Some("notes"));
/// let none: [(&str, &str); 0] = [];
/// assert_eq!(
///     project_key_from_request(none, Some("a=1&genres-type=billing")).as_deref(),
///     Some("billing")
/// );
/// ```
pub fn project_key_from_request<'a, I>(headers: I, query: Option<&str>) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let from_header = headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(PROJECT_HEADER))
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty());

    from_header.or_else(|| {
        let query = query?.trim_start_matches('?');
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == PROJECT_QUERY_PARAM)
            .map(|(_, value)| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Like [`project_key_from_request`], for endpoints that only serve projects.
pub fn require_project_key<'a, I>(headers: I, query: Option<&str>) -> FederationResult<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    project_key_from_request(headers, query)
        .ok_or_else(|| AuthError::InvalidRequest(format!("missing {}", PROJECT_HEADER)).into())
}

/// Token returned by a federated login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FederatedToken {
    /// Access-lifetime bearer token
    pub access_token: String,

    /// Token type (always "Bearer")
    pub token_type: String,

    /// Expires in seconds
    pub expires_in: i64,

    /// Project the token is bound to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,

    /// The user's id inside that project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_user_id: Option<String>,
}

/// Issues tokens that carry the user's project mapping.
#[derive(Clone)]
pub struct FederatedLogin {
    mapper: IdentityFederationMapper,
    issuer: TokenIssuer,
    policy: MappingPolicy,
}

impl FederatedLogin {
    /// Create a login service with an explicit policy.
    pub fn new(mapper: IdentityFederationMapper, issuer: TokenIssuer, policy: MappingPolicy) -> Self {
        Self { mapper, issuer, policy }
    }

    /// Create a login service using the configured policy.
    pub fn from_config(mapper: IdentityFederationMapper, issuer: TokenIssuer, config: &FederationConfig) -> Self {
        Self::new(mapper, issuer, config.policy)
    }

    /// The mapper used for project lookups.
    pub fn mapper(&self) -> &IdentityFederationMapper {
        &self.mapper
    }

    /// Issue a token for an authenticated user, mapping them into
    /// `project_key` when one is given.
    #[instrument(skip(self, user), fields(user_id = %user.id, project = ?project_key))]
    pub async fn login(&self, user: &Principal, project_key: Option<&str>) -> FederationResult<FederatedToken> {
        if !user.is_active() {
            return Err(AuthError::AccountDisabled.into());
        }

        let mapping = match project_key.map(str::trim).filter(|k| !k.is_empty()) {
            None => None,
            Some(key) => self.map_user(key, user).await?,
        };
        let (key, local_id) = match &mapping {
            Some((key, local_id)) => (Some(key.as_str()), Some(local_id.as_str())),
            None => (None, None),
        };

        let access_token = self
            .issuer
            .issue_unified(&user.id, user.login_identifier(), &user.role, key, local_id)?;
        debug!(federated = mapping.is_some(), "Login token issued");

        Ok(FederatedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.issuer.config().access_token_ttl.num_seconds(),
            project_key: key.map(String::from),
            local_user_id: local_id.map(String::from),
        })
    }

    async fn map_user(&self, key: &str, user: &Principal) -> FederationResult<Option<(String, String)>> {
        match self.mapper.ensure_mapping(key, user).await {
            Ok(local_id) => Ok(Some((key.to_string(), local_id))),
            Err(e @ FederationError::Token(_)) => Err(e),
            Err(e) if self.policy == MappingPolicy::BestEffort => {
                warn!(project = %key, error = %e, "Mapping failed, issuing token without project claims");
                Ok(None)
            }
            Err(e) => {
                warn!(project = %key, error = %e, "Mapping failed, rejecting login");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, OnceLock};

    use unit_auth::{AuthConfig, KeyRing, RsaSigningKey, TokenValidator};
    use unit_org::PrincipalStatus;

    use super::*;
    use crate::mapper::testing::{mapper_with, CountingClient};

    const SECRET: &str = "federation-test-secret-with-32-chars!!";
    const NO_HEADERS: [(&str, &str); 0] = [];

    fn keys() -> Arc<KeyRing> {
        static KEYS: OnceLock<Arc<KeyRing>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(KeyRing::new(SECRET, RsaSigningKey::generate().unwrap()).unwrap()))
            .clone()
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(keys(), AuthConfig::with_secret(SECRET))
    }

    fn validator() -> TokenValidator {
        TokenValidator::new(keys(), &AuthConfig::with_secret(SECRET))
    }

    fn alice() -> Principal {
        Principal::new("u1", "user").with_email("u1@example.com")
    }

    async fn login_with(client: CountingClient, policy: MappingPolicy) -> (FederatedLogin, Arc<CountingClient>) {
        let client = Arc::new(client);
        let (mapper, _) = mapper_with(client.clone()).await;
        (FederatedLogin::new(mapper, issuer(), policy), client)
    }

    #[tokio::test]
    async fn test_login_embeds_project_claims() {
        let (login, client) = login_with(CountingClient::default(), MappingPolicy::Strict).await;

        let token = login.login(&alice(), Some("notes")).await.unwrap();
        assert_eq!(token.project_key.as_deref(), Some("notes"));
        assert_eq!(token.local_user_id.as_deref(), Some("1000"));
        assert_eq!(token.expires_in, 3600);

        let claims = validator().validate(&token.access_token).unwrap();
        assert_eq!(claims.project_key.as_deref(), Some("notes"));
        assert_eq!(claims.local_user_id.as_deref(), Some("1000"));
        assert_eq!(claims.identifier, "u1@example.com");

        login.login(&alice(), Some("notes")).await.unwrap();
        assert_eq!(client.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_without_project() {
        let (login, client) = login_with(CountingClient::default(), MappingPolicy::Strict).await;

        for key in [None, Some(""), Some("  ")] {
            let token = login.login(&alice(), key).await.unwrap();
            assert!(token.project_key.is_none());
            let claims = validator().validate(&token.access_token).unwrap();
            assert!(claims.project_key.is_none());
            assert!(claims.aud.is_none());
        }
        assert_eq!(client.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_strict_policy_fails_closed() {
        let failing = CountingClient {
            fail: true,
            ..Default::default()
        };
        let (login, _) = login_with(failing, MappingPolicy::Strict).await;

        let result = login.login(&alice(), Some("notes")).await;
        assert!(matches!(result, Err(FederationError::RemoteProvisioningFailed { .. })));
        let result = login.login(&alice(), Some("legacy")).await;
        assert!(matches!(result, Err(FederationError::ProjectDisabledOrUnknown(_))));
    }

    #[tokio::test]
    async fn test_best_effort_policy_issues_plain_token() {
        let failing = CountingClient {
            fail: true,
            ..Default::default()
        };
        let (login, _) = login_with(failing, MappingPolicy::BestEffort).await;

        let token = login.login(&alice(), Some("notes")).await.unwrap();
        assert!(token.project_key.is_none());
        assert!(token.local_user_id.is_none());
        let claims = validator().validate(&token.access_token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.local_user_id.is_none());
    }

    #[tokio::test]
    async fn test_disabled_user_cannot_log_in() {
        let (login, _) = login_with(CountingClient::default(), MappingPolicy::BestEffort).await;
        let user = alice().with_status(PrincipalStatus::Disabled);

        let result = login.login(&user, Some("notes")).await;
        assert!(matches!(result, Err(FederationError::Token(AuthError::AccountDisabled))));
    }

    #[test]
    fn test_project_key_prefers_header() {
        let headers = [("Content-Type", "application/json"), ("X-Genres-Type", " notes ")];
        assert_eq!(
            project_key_from_request(headers, Some("genres-type=billing")).as_deref(),
            Some("notes")
        );
        assert_eq!(
            project_key_from_request([("X-Genres-Type", "")], Some("?genres-type=billing")).as_deref(),
            Some("billing")
        );
        assert_eq!(project_key_from_request(NO_HEADERS, Some("other=1")), None);
        assert_eq!(project_key_from_request(NO_HEADERS, None), None);
    }

    #[test]
    fn test_require_project_key() {
        let err = require_project_key(NO_HEADERS, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "invalid_request: missing X-Genres-Type");
        assert_eq!(require_project_key([("x-genres-type", "notes")], None).unwrap(), "notes");
    }
}
