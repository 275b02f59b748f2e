//! Federation error types

use thiserror::Error;
use unit_auth::AuthError;

/// Errors raised while resolving or creating project mappings.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Project key is unknown or the project is disabled
    #[error("Project disabled or unknown: {0}")]
    ProjectDisabledOrUnknown(String),

    /// The project's provisioning API failed (network, timeout, 4xx/5xx, bad body)
    #[error("Remote provisioning failed for project {project}: {reason}")]
    RemoteProvisioningFailed {
        /// Project key
        project: String,
        /// What went wrong
        reason: String,
    },

    /// No active mapping for the (project, user) pair
    #[error("No mapping for user {user_id} in project {project_key}")]
    MappingNotFound {
        /// Project key
        project_key: String,
        /// Central user id
        user_id: String,
    },

    /// A mapping exists but was deactivated
    #[error("Mapping for user {user_id} in project {project_key} is deactivated")]
    MappingDeactivated {
        /// Project key
        project_key: String,
        /// Central user id
        user_id: String,
    },

    /// Insert hit the (project, user) unique key
    #[error("Mapping already exists for user {user_id} in project {project_key}")]
    MappingConflict {
        /// Project key
        project_key: String,
        /// Central user id
        user_id: String,
    },

    /// Token issuance failed
    #[error(transparent)]
    Token(#[from] AuthError),
}

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;

impl FederationError {
    pub(crate) fn remote(project: &str, reason: impl Into<String>) -> Self {
        FederationError::RemoteProvisioningFailed {
            project: project.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        match self {
            FederationError::RemoteProvisioningFailed { .. } => true,
            FederationError::Token(e) => e.is_server_error(),
            _ => false,
        }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            FederationError::ProjectDisabledOrUnknown(_) => 400,
            FederationError::MappingNotFound { .. } => 404,
            FederationError::MappingDeactivated { .. } => 403,
            FederationError::MappingConflict { .. } => 409,
            FederationError::RemoteProvisioningFailed { .. } => 502,
            FederationError::Token(e) => e.status_code(),
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FederationError::ProjectDisabledOrUnknown(_) => "PROJECT_DISABLED_OR_UNKNOWN",
            FederationError::RemoteProvisioningFailed { .. } => "REMOTE_PROVISIONING_FAILED",
            FederationError::MappingNotFound { .. } => "MAPPING_NOT_FOUND",
            FederationError::MappingDeactivated { .. } => "MAPPING_DEACTIVATED",
            FederationError::MappingConflict { .. } => "MAPPING_CONFLICT",
            FederationError::Token(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_is_bad_gateway() {
        let err = FederationError::remote("notes", "HTTP 500");
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.error_code(), "REMOTE_PROVISIONING_FAILED");
        assert!(err.is_server_error());
        assert_eq!(
            err.to_string(),
            "Remote provisioning failed for project notes: HTTP 500"
        );
    }

    #[test]
    fn test_token_errors_pass_through() {
        let err = FederationError::from(AuthError::Expired);
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.error_code(), "TOKEN_EXPIRED");
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_unknown_project() {
        let err = FederationError::ProjectDisabledOrUnknown("ghost".into());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "PROJECT_DISABLED_OR_UNKNOWN");
    }
}
