//! Project and mapping stores.
//!
//! Both are async traits so deployments can back them with a database. The
//! memory implementations are complete and honour the same constraints a
//! relational schema would: one mapping per `(project_key, user_id)`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use unit_org::{Project, ProjectMapping};

use crate::error::{FederationError, FederationResult};

/// Lookup of subscribing projects.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Find a project by key, enabled or not.
    async fn find(&self, key: &str) -> FederationResult<Option<Project>>;

    /// Find an enabled project.
    ///
    /// Unknown and disabled projects are reported the same way so callers
    /// cannot probe which keys exist.
    async fn find_enabled(&self, key: &str) -> FederationResult<Project> {
        match self.find(key).await? {
            Some(project) if project.enabled => Ok(project),
            _ => Err(FederationError::ProjectDisabledOrUnknown(key.to_string())),
        }
    }
}

/// Persistence for project mappings.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Mapping for the pair, active or not.
    async fn find(&self, project_key: &str, user_id: &str) -> FederationResult<Option<ProjectMapping>>;

    /// Insert a new mapping.
    ///
    /// Fails with [`FederationError::MappingConflict`] when the pair already
    /// has one, whatever its state.
    async fn insert(&self, mapping: ProjectMapping) -> FederationResult<()>;

    /// Deactivate the mapping for the pair. Returns whether one was active.
    async fn deactivate(&self, project_key: &str, user_id: &str) -> FederationResult<bool>;

    /// Every mapping of a user across projects.
    async fn find_by_user(&self, user_id: &str) -> FederationResult<Vec<ProjectMapping>>;
}

/// In-memory project registry.
#[derive(Debug, Default)]
pub struct MemoryProjectRegistry {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryProjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a project.
    pub async fn upsert(&self, project: Project) {
        debug!(project = %project.key, enabled = project.enabled, "Project registered");
        self.projects.write().await.insert(project.key.clone(), project);
    }
}

#[async_trait]
impl ProjectRegistry for MemoryProjectRegistry {
    async fn find(&self, key: &str) -> FederationResult<Option<Project>> {
        Ok(self.projects.read().await.get(key).cloned())
    }
}

/// In-memory mapping store keyed by `(project_key, user_id)`.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    mappings: RwLock<HashMap<(String, String), ProjectMapping>>,
}

impl MemoryMappingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored mappings, active or not.
    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.mappings.read().await.is_empty()
    }
}

fn key(project_key: &str, user_id: &str) -> (String, String) {
    (project_key.to_string(), user_id.to_string())
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn find(&self, project_key: &str, user_id: &str) -> FederationResult<Option<ProjectMapping>> {
        Ok(self.mappings.read().await.get(&key(project_key, user_id)).cloned())
    }

    async fn insert(&self, mapping: ProjectMapping) -> FederationResult<()> {
        let mut mappings = self.mappings.write().await;
        let k = key(&mapping.project_key, &mapping.user_id);
        if mappings.contains_key(&k) {
            return Err(FederationError::MappingConflict {
                project_key: mapping.project_key,
                user_id: mapping.user_id,
            });
        }
        mappings.insert(k, mapping);
        Ok(())
    }

    async fn deactivate(&self, project_key: &str, user_id: &str) -> FederationResult<bool> {
        let mut mappings = self.mappings.write().await;
        match mappings.get_mut(&key(project_key, user_id)) {
            Some(mapping) if mapping.is_active => {
                mapping.deactivate();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_user(&self, user_id: &str) -> FederationResult<Vec<ProjectMapping>> {
        let mappings = self.mappings.read().await;
        let mut found: Vec<_> = mappings
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.project_key.cmp(&b.project_key));
        Ok(found)
    }
}
