//! Persistence contracts for releases, deployments and device updates
//!
//! The rollout core never talks to a database directly. Adapters implement
//! these traits; [`MemoryStore`] implements all three for tests and single-node
//! deployments.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::OtaResult;
use crate::model::{
    DeploymentStats, DeviceUpdate, FirmwareRelease, OtaDeployment, ReleaseChannel, UpdateStatus,
};

/// Release metadata persistence
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Persist a new release
    async fn create_release(&self, release: &FirmwareRelease) -> OtaResult<()>;

    /// Fetch a release by ID
    async fn get_release(&self, release_id: &str) -> OtaResult<FirmwareRelease>;

    /// Fetch the release with this exact template, version and channel
    async fn get_release_by_version(
        &self,
        template_id: &str,
        version: &str,
        channel: ReleaseChannel,
    ) -> OtaResult<FirmwareRelease>;

    /// Releases for a template and channel, newest first
    async fn list_releases(
        &self,
        template_id: &str,
        channel: ReleaseChannel,
    ) -> OtaResult<Vec<FirmwareRelease>>;

    /// Remove release metadata
    async fn delete_release(&self, release_id: &str) -> OtaResult<()>;

    /// Whether a release exists
    async fn release_exists(&self, release_id: &str) -> OtaResult<bool>;

    /// Releases of a template whose binary has this digest
    async fn find_by_binary_hash(
        &self,
        template_id: &str,
        binary_hash: &str,
    ) -> OtaResult<Vec<FirmwareRelease>>;
}

/// Deployment persistence
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist a new deployment
    async fn create_deployment(&self, deployment: &OtaDeployment) -> OtaResult<()>;

    /// Fetch a deployment by ID
    async fn get_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment>;

    /// Write `deployment` if its `version` matches the stored one.
    ///
    /// Returns the stored record with the bumped version, or a concurrency
    /// error when another writer got there first.
    async fn update_deployment(&self, deployment: &OtaDeployment) -> OtaResult<OtaDeployment>;

    /// Deployments of a release, newest first
    async fn list_deployments(&self, release_id: &str) -> OtaResult<Vec<OtaDeployment>>;

    /// Deployments currently active
    async fn get_active_deployments(&self) -> OtaResult<Vec<OtaDeployment>>;

    /// Remove a deployment (compensation only)
    async fn delete_deployment(&self, deployment_id: &str) -> OtaResult<()>;
}

/// Per-device update persistence
#[async_trait]
pub trait DeviceUpdateStore: Send + Sync {
    /// Persist a record, replacing any existing record for the same device and release
    async fn create_device_update(&self, update: &DeviceUpdate) -> OtaResult<()>;

    /// Fetch the record for a device and release
    async fn get_device_update(&self, device_id: &str, release_id: &str)
    -> OtaResult<DeviceUpdate>;

    /// Most recently started record for a device, if any
    async fn get_latest_update_for_device(&self, device_id: &str)
    -> OtaResult<Option<DeviceUpdate>>;

    /// Overwrite an existing record
    async fn update_device_update(&self, update: &DeviceUpdate) -> OtaResult<()>;

    /// All records of a deployment
    async fn list_device_updates(&self, deployment_id: &str) -> OtaResult<Vec<DeviceUpdate>>;

    /// Success/failure/pending counts recomputed from the deployment's rows
    async fn get_deployment_stats(&self, deployment_id: &str) -> OtaResult<DeploymentStats>;

    /// Records of a deployment in the given status
    async fn get_device_updates_by_status(
        &self,
        deployment_id: &str,
        status: UpdateStatus,
    ) -> OtaResult<Vec<DeviceUpdate>>;

    /// Up to `limit` device IDs still pending in a deployment
    async fn get_devices_pending_update(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> OtaResult<Vec<String>>;

    /// Remove a record (compensation only)
    async fn delete_device_update(&self, device_id: &str, release_id: &str) -> OtaResult<()>;
}
