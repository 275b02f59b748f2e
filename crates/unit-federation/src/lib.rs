//! # Unit Federation
//!
//! Cross-project identity mapping for the Unit identity service.
//!
//! ## Overview
//!
//! A project that delegates login to the service still keeps its own user
//! table. The first time a central user logs in through a project, the
//! service provisions them there over the project's REST API and remembers
//! the local id it got back. Tokens issued for that project then carry both
//! identities.
//!
//! - **Stores**: [`ProjectRegistry`] and [`MappingStore`], with in-memory
//!   implementations
//! - **Provisioning**: [`HttpProvisioningClient`] posts to
//!   `{base_url}/api/v1/users` with the project's credential
//! - **Mapping**: [`IdentityFederationMapper`] resolves or creates the local
//!   alias, provisioning each user at most once per project
//! - **Login**: [`FederatedLogin`] turns an authenticated principal and a
//!   project key into a token
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unit_federation::{
//!     FederatedLogin, FederationConfig, HttpProvisioningClient, IdentityFederationMapper,
//!     MemoryMappingStore, MemoryProjectRegistry,
//! };
//! # async fn run(issuer: unit_auth::TokenIssuer, user: unit_org::Principal) -> Result<(), Box<dyn std::error::Error>> {
//! let config = FederationConfig::from_env();
//! let mapper = IdentityFederationMapper::new(
//!     Arc::new(MemoryProjectRegistry::new()),
//!     Arc::new(MemoryMappingStore::new()),
//!     Arc::new(HttpProvisioningClient::new(&config)?),
//! );
//! let login = FederatedLogin::from_config(mapper, issuer, &config);
//! let token = login.login(&user, Some("notes")).await?;
//! println!("{:?}", token.local_user_id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod login;
pub mod mapper;
pub mod store;

pub use client::{HttpProvisioningClient, ProvisioningClient, PROJECT_TOKEN_HEADER, USERS_PATH};
pub use config::FederationConfig;
pub use error::{FederationError, FederationResult};
pub use login::{
    project_key_from_request, require_project_key, FederatedLogin, FederatedToken, MappingPolicy, PROJECT_HEADER,
    PROJECT_QUERY_PARAM,
};
pub use mapper::IdentityFederationMapper;
pub use store::{MappingStore, MemoryMappingStore, MemoryProjectRegistry, ProjectRegistry};
