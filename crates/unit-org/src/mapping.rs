//! Project mapping models
//!
//! A mapping associates a central user with the local user id a project
//! assigned when the user was provisioned there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Association between a central user and a project-local user.
///
/// Unique per `(project_key, user_id)`. Created once on first federated
/// login; afterwards only [`ProjectMapping::deactivate`] changes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMapping {
    /// Central user id
    pub user_id: String,

    /// Project key
    pub project_key: String,

    /// User id inside the project
    pub local_user_id: String,

    /// How the mapping was established
    pub mapping_type: MappingType,

    /// Inactive mappings are ignored by lookups
    pub is_active: bool,

    /// When the mapping was created
    pub created_at: DateTime<Utc>,
}

impl ProjectMapping {
    /// Create an active mapping.
    pub fn new(
        user_id: impl Into<String>,
        project_key: impl Into<String>,
        local_user_id: impl Into<String>,
        mapping_type: MappingType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_key: project_key.into(),
            local_user_id: local_user_id.into(),
            mapping_type,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Mark the mapping inactive.
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

/// How a mapping was established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// Created by the provisioning call during login
    #[default]
    Direct,

    /// Linked to a pre-existing local account
    Alias,

    /// Imported from another identity provider
    Federated,
}

impl MappingType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingType::Direct => "direct",
            MappingType::Alias => "alias",
            MappingType::Federated => "federated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_lifecycle() {
        let mut mapping = ProjectMapping::new("u1", "notes", "42", MappingType::Direct);
        assert!(mapping.is_active);
        mapping.deactivate();
        assert!(!mapping.is_active);
        assert_eq!(mapping.local_user_id, "42");
    }

    #[test]
    fn test_mapping_type_serde() {
        let json = serde_json::to_value(MappingType::Federated).unwrap();
        assert_eq!(json, "federated");
        assert_eq!(MappingType::Alias.as_str(), "alias");
        assert_eq!(MappingType::default(), MappingType::Direct);
    }
}
