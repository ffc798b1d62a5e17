//! Per-device update records
//!
//! The tracker owns creation, lookup and mutation of [`DeviceUpdate`] rows and
//! derives aggregate counts from them. It keeps no counters of its own: every
//! stats call recomputes from the full set of rows.

use std::sync::Arc;
use tracing::debug;

use crate::error::{OtaError, OtaResult};
use crate::model::{DeploymentStats, DeviceUpdate, UpdateStatus};
use crate::store::DeviceUpdateStore;

/// Owns device update records for deployments
pub struct DeviceUpdateTracker {
    updates: Arc<dyn DeviceUpdateStore>,
}

impl DeviceUpdateTracker {
    /// Create a tracker over `updates`
    pub fn new(updates: Arc<dyn DeviceUpdateStore>) -> Self {
        Self { updates }
    }

    /// Assign an update to a device
    pub async fn create_device_update(&self, update: &DeviceUpdate) -> OtaResult<()> {
        debug!(
            device_id = %update.device_id,
            release_id = %update.release_id,
            deployment_id = %update.deployment_id,
            "Creating device update record"
        );
        self.updates.create_device_update(update).await
    }

    /// Record for a device and release
    pub async fn get_device_update(
        &self,
        device_id: &str,
        release_id: &str,
    ) -> OtaResult<DeviceUpdate> {
        self.updates.get_device_update(device_id, release_id).await
    }

    /// Most recently started record for a device
    pub async fn get_latest_update_for_device(
        &self,
        device_id: &str,
    ) -> OtaResult<Option<DeviceUpdate>> {
        self.updates.get_latest_update_for_device(device_id).await
    }

    /// All records of a deployment
    pub async fn list_device_updates(&self, deployment_id: &str) -> OtaResult<Vec<DeviceUpdate>> {
        self.updates.list_device_updates(deployment_id).await
    }

    /// Persist a modified record
    pub async fn update_device_update(&self, update: &DeviceUpdate) -> OtaResult<()> {
        if update.progress > 100 {
            return Err(OtaError::validation("progress", "must be between 0 and 100"));
        }
        if update.status.is_terminal() != update.completed_at.is_some() {
            return Err(OtaError::validation(
                "completed_at",
                "must be set exactly when the status is terminal",
            ));
        }
        self.updates.update_device_update(update).await
    }

    /// Success, failure and pending counts for a deployment
    pub async fn get_deployment_stats(&self, deployment_id: &str) -> OtaResult<DeploymentStats> {
        self.updates.get_deployment_stats(deployment_id).await
    }

    /// Records of a deployment in one status
    pub async fn get_device_updates_by_status(
        &self,
        deployment_id: &str,
        status: UpdateStatus,
    ) -> OtaResult<Vec<DeviceUpdate>> {
        self.updates
            .get_device_updates_by_status(deployment_id, status)
            .await
    }

    /// Up to `limit` devices that have not started yet
    pub async fn get_devices_pending_update(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> OtaResult<Vec<String>> {
        self.updates
            .get_devices_pending_update(deployment_id, limit)
            .await
    }

    /// Remove a record created by a deployment that is being unwound
    pub(crate) async fn discard_device_update(
        &self,
        device_id: &str,
        release_id: &str,
    ) -> OtaResult<()> {
        self.updates
            .delete_device_update(device_id, release_id)
            .await
    }
}
