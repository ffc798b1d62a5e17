//! Wiring of the rollout components into one owned service

use std::sync::Arc;
use tracing::info;

use crate::config::RolloutConfig;
use crate::controller::RolloutController;
use crate::device_api::DeviceUpdateApi;
use crate::error::{OtaError, OtaResult};
use crate::locks::DeploymentLocks;
use crate::planner::DeploymentPlanner;
use crate::registry::{DeviceRegistry, InMemoryDeviceRegistry};
use crate::release::ReleaseManager;
use crate::rollback::RollbackEngine;
use crate::storage::{MemoryStorageBackend, StorageBackend};
use crate::store::{DeploymentStore, DeviceUpdateStore, MemoryStore, ReleaseStore};
use crate::tracker::DeviceUpdateTracker;
use fleet_ota_crypto::FirmwareSigner;

/// Every rollout component, sharing one set of stores and one lock table
pub struct OtaService {
    releases: Arc<ReleaseManager>,
    planner: Arc<DeploymentPlanner>,
    controller: Arc<RolloutController>,
    tracker: Arc<DeviceUpdateTracker>,
    rollback: Arc<RollbackEngine>,
    device_api: Arc<DeviceUpdateApi>,
    locks: Arc<DeploymentLocks>,
    config: RolloutConfig,
}

impl OtaService {
    /// Start building a service
    pub fn builder() -> OtaServiceBuilder {
        OtaServiceBuilder::default()
    }

    /// Release management
    pub fn releases(&self) -> &Arc<ReleaseManager> {
        &self.releases
    }

    /// Deployment creation, listing, pause and resume
    pub fn planner(&self) -> &Arc<DeploymentPlanner> {
        &self.planner
    }

    /// Activation, status reports and status aggregation
    pub fn controller(&self) -> &Arc<RolloutController> {
        &self.controller
    }

    /// Per-device update records
    pub fn tracker(&self) -> &Arc<DeviceUpdateTracker> {
        &self.tracker
    }

    /// Rollback to previous releases
    pub fn rollback(&self) -> &Arc<RollbackEngine> {
        &self.rollback
    }

    /// Device-facing operations
    pub fn device_api(&self) -> &Arc<DeviceUpdateApi> {
        &self.device_api
    }

    /// Shared per-deployment lock table
    pub fn locks(&self) -> &Arc<DeploymentLocks> {
        &self.locks
    }

    /// Active configuration
    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }
}

/// Builder for [`OtaService`]. Unset stores default to one shared [`MemoryStore`],
/// unset storage to [`MemoryStorageBackend`] and an unset registry to an empty
/// [`InMemoryDeviceRegistry`]. A signer is required.
#[derive(Default)]
pub struct OtaServiceBuilder {
    release_store: Option<Arc<dyn ReleaseStore>>,
    deployment_store: Option<Arc<dyn DeploymentStore>>,
    update_store: Option<Arc<dyn DeviceUpdateStore>>,
    storage: Option<Arc<dyn StorageBackend>>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    signer: Option<Arc<dyn FirmwareSigner>>,
    config: RolloutConfig,
}

impl OtaServiceBuilder {
    /// Use one store for releases, deployments and device updates
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ReleaseStore + DeploymentStore + DeviceUpdateStore + 'static,
    {
        let release_store: Arc<dyn ReleaseStore> = store.clone();
        let deployment_store: Arc<dyn DeploymentStore> = store.clone();
        let update_store: Arc<dyn DeviceUpdateStore> = store;
        self.release_store = Some(release_store);
        self.deployment_store = Some(deployment_store);
        self.update_store = Some(update_store);
        self
    }

    /// Release metadata store
    pub fn release_store(mut self, store: Arc<dyn ReleaseStore>) -> Self {
        self.release_store = Some(store);
        self
    }

    /// Deployment store
    pub fn deployment_store(mut self, store: Arc<dyn DeploymentStore>) -> Self {
        self.deployment_store = Some(store);
        self
    }

    /// Device update store
    pub fn update_store(mut self, store: Arc<dyn DeviceUpdateStore>) -> Self {
        self.update_store = Some(store);
        self
    }

    /// Binary storage backend
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Device registry used to resolve targets
    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Release signer
    pub fn signer(mut self, signer: Arc<dyn FirmwareSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Rollout configuration
    pub fn config(mut self, config: RolloutConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and wire the components
    pub fn build(self) -> OtaResult<OtaService> {
        self.config.validate()?;
        let Some(signer) = self.signer else {
            return Err(OtaError::validation("signer", "a firmware signer is required"));
        };

        let shared = Arc::new(MemoryStore::new());
        let release_store = self
            .release_store
            .unwrap_or_else(|| shared.clone() as Arc<dyn ReleaseStore>);
        let deployment_store = self
            .deployment_store
            .unwrap_or_else(|| shared.clone() as Arc<dyn DeploymentStore>);
        let update_store = self
            .update_store
            .unwrap_or_else(|| shared.clone() as Arc<dyn DeviceUpdateStore>);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorageBackend::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryDeviceRegistry::new()));
        let config = self.config;

        let locks = Arc::new(DeploymentLocks::new());
        let tracker = Arc::new(DeviceUpdateTracker::new(update_store));
        let releases = Arc::new(ReleaseManager::new(
            release_store.clone(),
            storage.clone(),
            signer,
            config.clone(),
        ));
        let planner = Arc::new(DeploymentPlanner::new(
            releases.clone(),
            deployment_store.clone(),
            tracker.clone(),
            registry,
            locks.clone(),
            config.clone(),
        ));
        let rollback = Arc::new(RollbackEngine::new(
            release_store.clone(),
            deployment_store.clone(),
            planner.clone(),
            locks.clone(),
        ));
        let controller = Arc::new(RolloutController::new(
            deployment_store.clone(),
            tracker.clone(),
            locks.clone(),
            config.auto_rollback.then(|| rollback.clone()),
        ));
        let device_api = Arc::new(DeviceUpdateApi::new(
            release_store,
            deployment_store,
            tracker.clone(),
            storage,
            controller.clone(),
            config.clone(),
        ));

        info!(
            auto_rollback = config.auto_rollback,
            deduplicate_binaries = config.deduplicate_binaries,
            "OTA service initialized"
        );

        Ok(OtaService {
            releases,
            planner,
            controller,
            tracker,
            rollback,
            device_api,
            locks,
            config,
        })
    }
}
