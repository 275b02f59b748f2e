//! # Unit Auth
//!
//! Token issuance, validation and rotation for the Unit identity service,
//! plus the OAuth2 / OpenID Connect provider it exposes to client projects.
//!
//! ## Overview
//!
//! The unit-auth crate handles:
//! - **Tokens**: HS256 internal tokens (access, refresh, remember-me,
//!   unified) and RS256 authorization codes and OAuth tokens
//! - **Keys**: a `kid`-indexed key ring published as a JWKS
//! - **Refresh rotation**: hashed, single-use refresh tokens with one active
//!   session per user
//! - **Authorization code flow**: PKCE and double verification for
//!   first-party clients, single-use codes
//! - **OAuth server**: token endpoint grants, userinfo, revocation,
//!   introspection and discovery
//! - **Login providers**: a registry of pluggable authentication methods
//!
//! ## Features
//!
//! - `oauth` (default): redirect login through external OAuth2 providers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unit_auth::{AuthConfig, KeyRing, TokenIssuer, TokenType, TokenValidator};
//!
//! let config = AuthConfig::from_env();
//! let keys = Arc::new(KeyRing::from_config(&config).unwrap());
//! let issuer = TokenIssuer::new(keys.clone(), config.clone());
//! let validator = TokenValidator::new(keys, &config);
//!
//! let token = issuer.issue_access("u1", "u1@example.com", "user").unwrap();
//! let claims = validator.validate_type(&token, TokenType::Access).unwrap();
//! assert_eq!(claims.sub, "u1");
//! ```
//!
//! ## Storage
//!
//! Refresh tokens, the blacklist, SSO sessions and OAuth clients live behind
//! async traits. The `Memory*` implementations are complete and are what
//! the tests run against; production deployments supply their own.

pub mod authorization_code;
pub mod claims;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod exchange;
pub mod issuer;
pub mod keys;
pub mod oauth_server;
pub mod pkce;
pub mod providers;
pub mod refresh;
pub mod session;
pub mod validator;

// Re-export main types
pub use authorization_code::{AuthorizationCodeEngine, AuthorizeOutcome, AuthorizeRequest, CodeExchangeRequest};
pub use claims::{AuthorizationCodeClaims, OAuthTokenClaims, PkceChallenge, TokenClaims, TokenType};
pub use client::{ClientRegistry, MemoryClientRegistry, OAuthClient};
pub use config::{AuthConfig, ConfigError};
pub use directory::{MemoryUserDirectory, UserDirectory};
pub use error::{AuthError, AuthResult, ErrorResponse};
pub use exchange::{TokenExchange, TokenExchangeRequest, TokenExchangeResponse};
pub use issuer::{CodeGrant, OAuthGrant, OAuthSubject, TokenIssuer, TokenPair};
pub use keys::{Jwk, JwkSet, KeyRing, RsaSigningKey};
pub use oauth_server::{
    GrantType, IntrospectionResponse, OAuthServer, ProviderMetadata, TokenOperationRequest, TokenRequest,
    TokenResponse, UserInfo,
};
pub use providers::{AuthProvider, DirectoryPasswordProvider, OAuthState, ProviderKind, ProviderRegistry};
pub use refresh::{
    ClientInfo, MemoryRefreshTokenRepository, RefreshTokenRecord, RefreshTokenRepository, RefreshTokenStore,
};
pub use session::{MemorySsoSessionStore, MemoryTokenBlacklist, SessionRegistry, SsoSession, SsoSessionStore, TokenBlacklist};
pub use validator::TokenValidator;

#[cfg(feature = "oauth")]
pub use providers::{ExternalIdentityClient, ExternalProvider, ExternalProviderConfig, ExternalUserInfo, OAuthRedirectProvider};
