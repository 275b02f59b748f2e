//! # Unit Org
//!
//! Domain models shared by the Unit identity crates.
//!
//! ## Overview
//!
//! The unit-org crate holds the records the token engine reads but does not
//! own:
//! - **Principals**: central user identities with role and status
//! - **Projects**: downstream applications that delegate login
//! - **Mappings**: per-project local aliases of central users
//!
//! ## Architecture
//!
//! ```text
//! Principal
//!   └─ ProjectMapping (one per project) ─→ Project
//!                                            └─ provisioning API (base_url)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use unit_org::{MappingType, Principal, Project, ProjectMapping};
//!
//! let user = Principal::new("u1", "user").with_email("u1@example.com");
//! let project = Project::new("notes", "Notes", "https://notes.example.com");
//! let mapping = ProjectMapping::new(&user.id, &project.key, "1001", MappingType::Direct);
//! assert!(mapping.is_active);
//! ```

pub mod mapping;
pub mod principal;
pub mod project;

pub use mapping::{MappingType, ProjectMapping};
pub use principal::{Principal, PrincipalStatus};
pub use project::{AuthMode, OutboundUser, Project, DEFAULT_PROJECT_TIMEOUT_MS};
