//! Error types for token and grant operations
//!
//! This module defines every failure the engine reports: token validation,
//! refresh rotation, authorization-code exchange, client authentication and
//! configuration problems.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::claims::TokenType;

/// Authentication error types.
///
/// Each variant maps to a stable machine-readable code ([`AuthError::error_code`]),
/// an HTTP status ([`AuthError::status_code`]) and, for the OAuth endpoints,
/// an RFC 6749 error code ([`AuthError::oauth_error`]).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token could not be parsed
    #[error("Malformed token")]
    Malformed,

    /// Token signature did not verify
    #[error("Invalid token signature")]
    SignatureInvalid,

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Token is valid but of another variant than the caller requires
    #[error("Wrong token type: expected {expected}, got {actual}")]
    WrongTokenType {
        /// Type required by the caller
        expected: TokenType,
        /// Type found in the token
        actual: TokenType,
    },

    /// Token was explicitly revoked
    #[error("Token has been revoked")]
    Blacklisted,

    /// No active refresh token matched
    #[error("invalid refresh token")]
    NoMatchingToken,

    /// Refresh token was already revoked
    #[error("Refresh token already revoked")]
    AlreadyRevoked,

    /// Grant is invalid (bad code, redirect mismatch, PKCE failure, ...)
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Double verification parameters are missing
    #[error("invalid_grant: {0}")]
    MissingPkceParameters(String),

    /// Client authentication failed
    #[error("invalid_client: client authentication failed")]
    InvalidClient,

    /// Client is not allowed to use this grant type
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// Grant type is not supported
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Response type is not supported
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    /// Request is missing or has invalid parameters
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Requested scope is not allowed for the client
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// Invalid credentials
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account is disabled
    #[error("Account is disabled")]
    AccountDisabled,

    /// User does not exist
    #[error("User not found")]
    UserNotFound,

    /// No login provider registered under the name
    #[error("Auth provider not found: {0}")]
    ProviderNotFound(String),

    /// Login provider exists but is disabled
    #[error("Auth provider disabled: {0}")]
    ProviderDisabled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected tokens and grants are expected traffic and are not.
    pub fn is_server_error(&self) -> bool {
        matches!(self, AuthError::Internal(_) | AuthError::ConfigError(_))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Malformed
            | AuthError::SignatureInvalid
            | AuthError::Expired
            | AuthError::WrongTokenType { .. }
            | AuthError::Blacklisted
            | AuthError::NoMatchingToken
            | AuthError::AlreadyRevoked
            | AuthError::InvalidClient
            | AuthError::InvalidCredentials => 401,

            AuthError::AccountDisabled => 403,
            AuthError::UserNotFound | AuthError::ProviderNotFound(_) => 404,

            AuthError::InvalidGrant(_)
            | AuthError::MissingPkceParameters(_)
            | AuthError::UnauthorizedClient(_)
            | AuthError::UnsupportedGrantType(_)
            | AuthError::UnsupportedResponseType(_)
            | AuthError::InvalidRequest(_)
            | AuthError::InvalidScope(_)
            | AuthError::ProviderDisabled(_) => 400,

            AuthError::ConfigError(_) | AuthError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Malformed => "TOKEN_MALFORMED",
            AuthError::SignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            AuthError::Expired => "TOKEN_EXPIRED",
            AuthError::WrongTokenType { .. } => "WRONG_TOKEN_TYPE",
            AuthError::Blacklisted => "TOKEN_REVOKED",
            AuthError::NoMatchingToken => "NO_MATCHING_TOKEN",
            AuthError::AlreadyRevoked => "ALREADY_REVOKED",
            AuthError::InvalidGrant(_) => "INVALID_GRANT",
            AuthError::MissingPkceParameters(_) => "MISSING_PKCE_PARAMETERS",
            AuthError::InvalidClient => "INVALID_CLIENT",
            AuthError::UnauthorizedClient(_) => "UNAUTHORIZED_CLIENT",
            AuthError::UnsupportedGrantType(_) => "UNSUPPORTED_GRANT_TYPE",
            AuthError::UnsupportedResponseType(_) => "UNSUPPORTED_RESPONSE_TYPE",
            AuthError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthError::InvalidScope(_) => "INVALID_SCOPE",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountDisabled => "ACCOUNT_DISABLED",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            AuthError::ProviderDisabled(_) => "PROVIDER_DISABLED",
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the RFC 6749 error code used by the OAuth endpoints.
    pub fn oauth_error(&self) -> &'static str {
        match self {
            AuthError::InvalidClient => "invalid_client",
            AuthError::UnauthorizedClient(_) => "unauthorized_client",
            AuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            AuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::InvalidScope(_) => "invalid_scope",
            AuthError::ConfigError(_) | AuthError::Internal(_) => "server_error",
            AuthError::Malformed
            | AuthError::SignatureInvalid
            | AuthError::Expired
            | AuthError::WrongTokenType { .. }
            | AuthError::Blacklisted
            | AuthError::NoMatchingToken
            | AuthError::AlreadyRevoked
            | AuthError::InvalidGrant(_)
            | AuthError::MissingPkceParameters(_)
            | AuthError::InvalidCredentials
            | AuthError::AccountDisabled
            | AuthError::UserNotFound
            | AuthError::ProviderNotFound(_)
            | AuthError::ProviderDisabled(_) => "invalid_grant",
        }
    }

    /// Build the wire-level error body.
    ///
    /// Server-side failures are reported without their internal detail.
    pub fn to_response(&self) -> ErrorResponse {
        let description = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.description()
        };
        ErrorResponse {
            error: self.oauth_error().to_string(),
            error_description: description,
        }
    }

    fn description(&self) -> String {
        match self {
            AuthError::InvalidGrant(msg)
            | AuthError::MissingPkceParameters(msg)
            | AuthError::UnauthorizedClient(msg)
            | AuthError::UnsupportedGrantType(msg)
            | AuthError::UnsupportedResponseType(msg)
            | AuthError::InvalidRequest(msg)
            | AuthError::InvalidScope(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => AuthError::SignatureInvalid,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::ImmatureSignature
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject => AuthError::Malformed,
            _ => AuthError::Internal(format!("JWT error: {}", e)),
        }
    }
}

/// OAuth2 error body `{error, error_description}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// RFC 6749 error code
    pub error: String,

    /// Human-readable message
    pub error_description: String,
}
