//! Identity federation mapper.
//!
//! Gives a central user a stable local alias inside each subscribing
//! project. The first login through a project provisions the user remotely
//! and records the returned id; every later login is a pure read.
//!
//! Two guards keep a user from being provisioned twice:
//! - calls for the same `(project, user)` pair are single-flighted inside
//!   this process, so only one of them reaches the project API (a cancelled
//!   caller still releases its slot);
//! - the mapping store rejects a second row for the pair, and the loser of
//!   that race re-reads the winner's row instead of failing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use unit_org::{MappingType, OutboundUser, Principal, Project, ProjectMapping};

use crate::client::ProvisioningClient;
use crate::error::{FederationError, FederationResult};
use crate::store::{MappingStore, ProjectRegistry};

type FlightKey = (String, String);
type FlightMap = Arc<StdMutex<HashMap<FlightKey, Arc<Mutex<()>>>>>;

/// One caller's claim on a `(project, user)` flight. Dropping it, on return
/// or on cancellation, removes the map entry once nobody else holds it.
struct Flight {
    map: FlightMap,
    key: FlightKey,
    lock: Arc<Mutex<()>>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        let mut in_flight = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // Map entry plus ours: nobody else is waiting.
        let ours = in_flight.get(&self.key).is_some_and(|l| Arc::ptr_eq(l, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(&self.key);
        }
    }
}

/// Resolves and creates project mappings.
#[derive(Clone)]
pub struct IdentityFederationMapper {
    projects: Arc<dyn ProjectRegistry>,
    mappings: Arc<dyn MappingStore>,
    client: Arc<dyn ProvisioningClient>,
    in_flight: FlightMap,
}

impl IdentityFederationMapper {
    /// Create a mapper.
    pub fn new(
        projects: Arc<dyn ProjectRegistry>,
        mappings: Arc<dyn MappingStore>,
        client: Arc<dyn ProvisioningClient>,
    ) -> Self {
        Self {
            projects,
            mappings,
            client,
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Local user id of an active mapping. Never calls the project.
    pub async fn resolve(&self, project_key: &str, user_id: &str) -> FederationResult<String> {
        match self.mappings.find(project_key, user_id).await? {
            Some(mapping) if mapping.is_active => Ok(mapping.local_user_id),
            _ => Err(FederationError::MappingNotFound {
                project_key: project_key.to_string(),
                user_id: user_id.to_string(),
            }),
        }
    }

    /// Local user id for `user` in `project_key`, provisioning it on first use.
    ///
    /// A failed provisioning call writes nothing, so the next attempt starts
    /// from scratch.
    #[instrument(skip(self, user), fields(project = %project_key, user_id = %user.id))]
    pub async fn ensure_mapping(&self, project_key: &str, user: &Principal) -> FederationResult<String> {
        let project = self.projects.find_enabled(project_key).await?;

        if let Some(local_id) = self.existing(project_key, &user.id).await? {
            debug!("Mapping already present");
            return Ok(local_id);
        }

        let flight = self.flight(project_key, &user.id);
        let _guard = flight.lock.lock().await;
        self.provision_once(&project, user).await
    }

    async fn provision_once(&self, project: &Project, user: &Principal) -> FederationResult<String> {
        // Whoever held the flight before us may have finished the job.
        if let Some(local_id) = self.existing(&project.key, &user.id).await? {
            return Ok(local_id);
        }

        let local_id = self
            .client
            .create_user(project, &OutboundUser::from(user))
            .await?;

        let mapping = ProjectMapping::new(&user.id, &project.key, &local_id, MappingType::Direct);
        match self.mappings.insert(mapping).await {
            Ok(()) => {
                info!(project = %project.key, user_id = %user.id, local_user_id = %local_id, "Mapping created");
                Ok(local_id)
            }
            Err(FederationError::MappingConflict { .. }) => {
                warn!(project = %project.key, user_id = %user.id, "Mapping created concurrently, re-reading");
                self.existing(&project.key, &user.id)
                    .await?
                    .ok_or_else(|| FederationError::MappingNotFound {
                        project_key: project.key.clone(),
                        user_id: user.id.clone(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Active mapping's local id, `None` when absent, error when deactivated.
    async fn existing(&self, project_key: &str, user_id: &str) -> FederationResult<Option<String>> {
        match self.mappings.find(project_key, user_id).await? {
            Some(mapping) if mapping.is_active => Ok(Some(mapping.local_user_id)),
            Some(_) => Err(FederationError::MappingDeactivated {
                project_key: project_key.to_string(),
                user_id: user_id.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn flight(&self, project_key: &str, user_id: &str) -> Flight {
        let key = (project_key.to_string(), user_id.to_string());
        let lock = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        Flight {
            map: self.in_flight.clone(),
            key,
            lock,
        }
    }

    /// Deactivate the mapping so the user can no longer log in through the
    /// project. Returns whether an active mapping was changed.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, project_key: &str, user_id: &str) -> FederationResult<bool> {
        let changed = self.mappings.deactivate(project_key, user_id).await?;
        if changed {
            info!("Mapping deactivated");
        }
        Ok(changed)
    }

    /// Push the user's current profile to a project they are mapped in.
    #[instrument(skip(self, user), fields(project = %project_key, user_id = %user.id))]
    pub async fn sync_profile(&self, project_key: &str, user: &Principal) -> FederationResult<()> {
        let project = self.projects.find_enabled(project_key).await?;
        let local_id = self.resolve(project_key, &user.id).await?;
        self.client
            .update_user(&project, &local_id, &OutboundUser::from(user))
            .await
    }

    /// Every mapping of a user.
    pub async fn mappings_for_user(&self, user_id: &str) -> FederationResult<Vec<ProjectMapping>> {
        self.mappings.find_by_user(user_id).await
    }
}
