//! Deployment lifecycle driven by device reports
//!
//! # Concurrency
//!
//! Every report is processed under the owning deployment's entry in
//! [`DeploymentLocks`], so the "read deployment, recompute stats, write
//! deployment" sequence is never interleaved for one deployment. Reports for
//! different deployments proceed independently. The store's version check backs
//! this up for writers that bypass the lock table.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OtaError, OtaResult};
use crate::locks::DeploymentLocks;
use crate::model::{
    DeploymentStatus, DeploymentStatusReport, DeviceUpdate, OtaDeployment, UpdateStatusReport,
};
use crate::rollback::RollbackEngine;
use crate::store::DeploymentStore;
use crate::tracker::DeviceUpdateTracker;

/// Status a deployment should be in given its refreshed counters.
///
/// Only `active` and `paused` deployments move; everything else keeps its status.
pub fn derive_status(deployment: &OtaDeployment) -> DeploymentStatus {
    match deployment.status {
        DeploymentStatus::Active | DeploymentStatus::Paused => {
            if deployment.threshold_reached(deployment.failure_count) {
                DeploymentStatus::Failed
            } else if deployment.success_count >= deployment.total_devices() {
                DeploymentStatus::Completed
            } else {
                deployment.status
            }
        }
        other => other,
    }
}

/// Result of processing one device report
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    /// Whether the report changed the device record
    pub applied: bool,
    /// Device record after the report
    pub device_update: DeviceUpdate,
    /// Owning deployment after the report
    pub deployment: OtaDeployment,
    /// Deployment created by an automatic rollback, if one ran
    pub rollback: Option<OtaDeployment>,
}

/// Drives existing deployments
pub struct RolloutController {
    deployments: Arc<dyn DeploymentStore>,
    tracker: Arc<DeviceUpdateTracker>,
    locks: Arc<DeploymentLocks>,
    auto_rollback: Option<Arc<RollbackEngine>>,
}

impl RolloutController {
    /// Create a controller. Passing a rollback engine enables automatic rollback
    /// when a deployment crosses its failure threshold.
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        tracker: Arc<DeviceUpdateTracker>,
        locks: Arc<DeploymentLocks>,
        auto_rollback: Option<Arc<RollbackEngine>>,
    ) -> Self {
        Self {
            deployments,
            tracker,
            locks,
            auto_rollback,
        }
    }

    /// Start handing out a pending deployment
    pub async fn activate_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        let _guard = self.locks.lock(deployment_id).await;

        let mut deployment = self.deployments.get_deployment(deployment_id).await?;
        if deployment.status != DeploymentStatus::Pending {
            return Err(OtaError::InvalidTransition {
                deployment_id: deployment_id.to_string(),
                status: deployment.status,
                action: "activate",
            });
        }

        deployment.status = DeploymentStatus::Active;
        deployment.updated_at = Utc::now();
        let deployment = self.deployments.update_deployment(&deployment).await?;

        info!(
            deployment_id = %deployment_id,
            targets = deployment.target_devices.len(),
            "Activated deployment"
        );
        Ok(deployment)
    }

    /// Apply a device's status report and refresh the owning deployment
    pub async fn report_update_status(
        &self,
        report: &UpdateStatusReport,
    ) -> OtaResult<ReportOutcome> {
        if report.progress > 100 {
            return Err(OtaError::validation("progress", "must be between 0 and 100"));
        }

        let mut deployment_id = self
            .tracker
            .get_device_update(&report.device_id, &report.release_id)
            .await?
            .deployment_id;

        let (applied, device_update, deployment, newly_failed) = loop {
            let _guard = self.locks.lock(&deployment_id).await;

            // re-read under the lock; a rollback may have moved the record to
            // another deployment since the lookup
            let mut device_update = self
                .tracker
                .get_device_update(&report.device_id, &report.release_id)
                .await?;
            if device_update.deployment_id != deployment_id {
                debug!(
                    device_id = %report.device_id,
                    from = %deployment_id,
                    to = %device_update.deployment_id,
                    "Update record moved to another deployment, retrying under its lock"
                );
                deployment_id = device_update.deployment_id;
                continue;
            }
            let now = Utc::now();
            let applied = device_update.apply_report(report, now);
            if applied {
                self.tracker.update_device_update(&device_update).await?;
            } else {
                debug!(
                    device_id = %report.device_id,
                    release_id = %report.release_id,
                    current = %device_update.status,
                    reported = %report.status,
                    "Ignoring report that does not advance the update"
                );
            }

            let mut deployment = self.deployments.get_deployment(&deployment_id).await?;
            let stats = self.tracker.get_deployment_stats(&deployment_id).await?;
            let previous = deployment.status;
            let previous_counts = (deployment.success_count, deployment.failure_count);

            deployment.success_count = stats.success_count;
            deployment.failure_count = stats.failure_count;
            deployment.status = derive_status(&deployment);

            let changed = previous_counts != (deployment.success_count, deployment.failure_count)
                || previous != deployment.status;
            if changed {
                deployment.updated_at = now;
                deployment = self.deployments.update_deployment(&deployment).await?;
            }

            if previous != deployment.status {
                info!(
                    deployment_id = %deployment_id,
                    success = deployment.success_count,
                    failure = deployment.failure_count,
                    total = deployment.total_devices(),
                    "Deployment {} -> {}",
                    previous,
                    deployment.status
                );
            }

            let newly_failed = previous != DeploymentStatus::Failed
                && deployment.status == DeploymentStatus::Failed;
            break (applied, device_update, deployment, newly_failed);
        };

        let mut rollback = None;
        if newly_failed && let Some(engine) = &self.auto_rollback {
            match engine.rollback_deployment(&deployment_id).await {
                Ok(created) => {
                    info!(
                        deployment_id = %deployment_id,
                        rollback_deployment_id = %created.deployment_id,
                        "Rolled back failed deployment automatically"
                    );
                    rollback = Some(created);
                }
                Err(e) => {
                    warn!(
                        deployment_id = %deployment_id,
                        error = %e,
                        "Automatic rollback failed"
                    );
                }
            }
        }

        Ok(ReportOutcome {
            applied,
            device_update,
            deployment,
            rollback,
        })
    }

    /// Aggregated progress of a deployment, computed from its device records
    pub async fn get_deployment_status(
        &self,
        deployment_id: &str,
    ) -> OtaResult<DeploymentStatusReport> {
        let deployment = self.deployments.get_deployment(deployment_id).await?;
        let updates = self.tracker.list_device_updates(deployment_id).await?;
        Ok(DeploymentStatusReport::build(&deployment, &updates))
    }
}
