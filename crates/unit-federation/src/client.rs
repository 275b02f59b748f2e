//! Project provisioning client.
//!
//! Creates and updates user records in a project's own user table through
//! its REST API. Calls are bounded by the project's timeout and never
//! retried here; a caller that wants retries owns that policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use unit_org::{AuthMode, OutboundUser, Project};

use crate::config::FederationConfig;
use crate::error::{FederationError, FederationResult};

/// Path of the provisioning collection on every project.
pub const USERS_PATH: &str = "/api/v1/users";

/// Header carrying the credential of `api_key` projects.
pub const PROJECT_TOKEN_HEADER: &str = "X-Project-Token";

/// Remote user provisioning.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Create the user in the project. Returns the project-local user id.
    async fn create_user(&self, project: &Project, user: &OutboundUser) -> FederationResult<String>;

    /// Push profile changes for an already provisioned user.
    async fn update_user(
        &self,
        project: &Project,
        local_user_id: &str,
        user: &OutboundUser,
    ) -> FederationResult<()>;
}

#[derive(Debug, Deserialize)]
struct CreateUserResponse {
    #[serde(default)]
    user_id: Value,
}

/// Normalize a remote `user_id` that may be a JSON string or number.
///
/// A float is accepted only when it holds a whole value that fits in `i64`
/// (`7.0` is `"7"`); anything else is not a usable id.
fn local_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            (None, None) => {
                let f = n.as_f64()?;
                let whole = f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64;
                if !whole {
                    return None;
                }
                (f as i64).to_string()
            }
        },
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// [`ProvisioningClient`] speaking HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpProvisioningClient {
    client: Client,
    default_timeout: Duration,
}

impl HttpProvisioningClient {
    /// Create a client using `config` for projects without their own timeout.
    pub fn new(config: &FederationConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("unit-federation/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client, config: &FederationConfig) -> Self {
        Self {
            client,
            default_timeout: config.timeout(),
        }
    }

    fn timeout_for(&self, project: &Project) -> Duration {
        if project.timeout_ms == 0 {
            self.default_timeout
        } else {
            project.timeout()
        }
    }

    fn authorize(&self, project: &Project, request: RequestBuilder) -> RequestBuilder {
        match (project.auth_mode, project.credentials.as_deref()) {
            (AuthMode::ApiKey, Some(token)) if !token.is_empty() => {
                request.header(PROJECT_TOKEN_HEADER, token)
            }
            (AuthMode::Bearer, Some(token)) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn send(&self, project: &Project, request: RequestBuilder) -> FederationResult<Response> {
        let response = self
            .authorize(project, request)
            .timeout(self.timeout_for(project))
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("timed out after {}ms", self.timeout_for(project).as_millis())
                } else {
                    format!("request failed: {}", e)
                };
                warn!(project = %project.key, %reason, "Provisioning request failed");
                FederationError::remote(&project.key, reason)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(project = %project.key, status = status.as_u16(), "Provisioning API returned an error");
            return Err(FederationError::remote(
                &project.key,
                format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProvisioningClient for HttpProvisioningClient {
    #[instrument(skip(self, project, user), fields(project = %project.key, user_id = %user.user_id))]
    async fn create_user(&self, project: &Project, user: &OutboundUser) -> FederationResult<String> {
        let url = project.url(USERS_PATH);
        debug!(%url, "Provisioning user");

        let response = self.send(project, self.client.post(&url).json(user)).await?;
        let body: CreateUserResponse = response
            .json()
            .await
            .map_err(|e| FederationError::remote(&project.key, format!("invalid response body: {}", e)))?;

        local_id(&body.user_id)
            .ok_or_else(|| FederationError::remote(&project.key, format!("invalid local user id: {}", body.user_id)))
    }

    #[instrument(skip(self, project, user), fields(project = %project.key, local_user_id = %local_user_id))]
    async fn update_user(
        &self,
        project: &Project,
        local_user_id: &str,
        user: &OutboundUser,
    ) -> FederationResult<()> {
        let url = project.url(&format!("{}/{}", USERS_PATH, local_user_id));
        self.send(project, self.client.put(&url).json(user)).await?;
        debug!("Remote profile updated");
        Ok(())
    }
}
