//! Device-facing operations
//!
//! Devices poll [`DeviceUpdateApi::get_update_for_device`] and push progress
//! through [`DeviceUpdateApi::report_update_status`]. "Nothing to install" is
//! reported as [`OtaError::NoPendingUpdate`], never as a not-found.

use std::sync::Arc;
use tracing::debug;

use crate::config::RolloutConfig;
use crate::controller::{ReportOutcome, RolloutController};
use crate::error::{EntityKind, OtaError, OtaResult};
use crate::model::{DeploymentStatus, PendingUpdate, UpdateStatus, UpdateStatusReport};
use crate::storage::{StorageBackend, with_timeout};
use crate::store::{DeploymentStore, ReleaseStore};
use crate::tracker::DeviceUpdateTracker;

/// Entry point for devices
pub struct DeviceUpdateApi {
    releases: Arc<dyn ReleaseStore>,
    deployments: Arc<dyn DeploymentStore>,
    tracker: Arc<DeviceUpdateTracker>,
    storage: Arc<dyn StorageBackend>,
    controller: Arc<RolloutController>,
    config: RolloutConfig,
}

impl DeviceUpdateApi {
    /// Create the device surface
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployments: Arc<dyn DeploymentStore>,
        tracker: Arc<DeviceUpdateTracker>,
        storage: Arc<dyn StorageBackend>,
        controller: Arc<RolloutController>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            releases,
            deployments,
            tracker,
            storage,
            controller,
            config,
        }
    }

    /// Descriptor for the update a device should install next.
    ///
    /// Only the device's latest record counts, and only while it is pending and
    /// its deployment is active.
    pub async fn get_update_for_device(&self, device_id: &str) -> OtaResult<PendingUpdate> {
        let Some(update) = self.tracker.get_latest_update_for_device(device_id).await? else {
            return Err(OtaError::NoPendingUpdate(device_id.to_string()));
        };
        if update.status != UpdateStatus::Pending {
            debug!(device_id = %device_id, status = %update.status, "Latest update is not pending");
            return Err(OtaError::NoPendingUpdate(device_id.to_string()));
        }

        let deployment = match self.deployments.get_deployment(&update.deployment_id).await {
            Ok(deployment) => deployment,
            Err(e) if e.is_not_found(EntityKind::Deployment) => {
                return Err(OtaError::NoPendingUpdate(device_id.to_string()));
            }
            Err(e) => return Err(e),
        };
        if deployment.status != DeploymentStatus::Active {
            debug!(
                device_id = %device_id,
                deployment_id = %deployment.deployment_id,
                status = %deployment.status,
                "Withholding update from inactive deployment"
            );
            return Err(OtaError::NoPendingUpdate(device_id.to_string()));
        }

        let release = self.releases.get_release(&update.release_id).await?;
        let binary_url = with_timeout(
            self.config.storage_timeout,
            "get_binary_url",
            self.storage
                .get_binary_url(&release.binary_path, self.config.download_url_expiry),
        )
        .await?;

        debug!(
            device_id = %device_id,
            release_id = %release.release_id,
            "Handing out pending update"
        );
        Ok(PendingUpdate {
            release_id: release.release_id,
            version: release.version,
            binary_url,
            binary_hash: release.binary_hash,
            binary_size: release.binary_size,
            signature: release.signature,
            release_notes: release.release_notes,
            created_at: release.created_at,
        })
    }

    /// Record a device's progress
    pub async fn report_update_status(
        &self,
        report: &UpdateStatusReport,
    ) -> OtaResult<ReportOutcome> {
        self.controller.report_update_status(report).await
    }
}
