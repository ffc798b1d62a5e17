//! Rollback to the previous release of a template and channel

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{OtaError, OtaResult};
use crate::locks::DeploymentLocks;
use crate::model::{DeploymentConfig, DeploymentStatus, FirmwareRelease, OtaDeployment};
use crate::planner::DeploymentPlanner;
use crate::store::{DeploymentStore, ReleaseStore};

/// Newest release strictly older than `current` among `candidates`
pub fn previous_release<'a>(
    current: &FirmwareRelease,
    candidates: &'a [FirmwareRelease],
) -> Option<&'a FirmwareRelease> {
    candidates
        .iter()
        .filter(|r| r.release_id != current.release_id && r.created_at < current.created_at)
        .max_by_key(|r| r.created_at)
}

/// Republishes the previous release to a failing deployment's devices
pub struct RollbackEngine {
    releases: Arc<dyn ReleaseStore>,
    deployments: Arc<dyn DeploymentStore>,
    planner: Arc<DeploymentPlanner>,
    locks: Arc<DeploymentLocks>,
}

impl RollbackEngine {
    /// Create a rollback engine
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployments: Arc<dyn DeploymentStore>,
        planner: Arc<DeploymentPlanner>,
        locks: Arc<DeploymentLocks>,
    ) -> Self {
        Self {
            releases,
            deployments,
            planner,
            locks,
        }
    }

    /// Roll `deployment_id` back to the previous release.
    ///
    /// The old deployment ends up `failed` and remembers its rollback; a second
    /// rollback of the same deployment is rejected. The returned deployment is
    /// immediate, already active, and targets exactly the old deployment's devices.
    /// If the old deployment cannot be updated the new one is removed again.
    pub async fn rollback_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        let _guard = self.locks.lock(deployment_id).await;

        let deployment = self.deployments.get_deployment(deployment_id).await?;
        if matches!(
            deployment.status,
            DeploymentStatus::Completed | DeploymentStatus::RolledBack
        ) {
            return Err(OtaError::InvalidTransition {
                deployment_id: deployment_id.to_string(),
                status: deployment.status,
                action: "roll back",
            });
        }
        if let Some(existing) = &deployment.rolled_back_by {
            warn!(
                deployment_id = %deployment_id,
                rollback_deployment_id = %existing,
                "Deployment was already rolled back"
            );
            return Err(OtaError::InvalidTransition {
                deployment_id: deployment_id.to_string(),
                status: deployment.status,
                action: "roll back an already rolled back",
            });
        }

        let release = self.releases.get_release(&deployment.release_id).await?;
        let history = self
            .releases
            .list_releases(&release.template_id, release.channel)
            .await?;
        let Some(target) = previous_release(&release, &history) else {
            warn!(
                deployment_id = %deployment_id,
                template_id = %release.template_id,
                channel = %release.channel,
                "No older release to roll back to"
            );
            return Err(OtaError::NoRollbackTarget {
                deployment_id: deployment_id.to_string(),
            });
        };

        let config = DeploymentConfig::immediate()
            .with_failure_threshold(deployment.failure_threshold)
            .with_target_devices(deployment.target_devices.clone());
        let rollback = self.planner.deploy_release(&target.release_id, config).await?;

        let mut failed = deployment;
        failed.status = DeploymentStatus::Failed;
        failed.rolled_back_by = Some(rollback.deployment_id.clone());
        failed.updated_at = Utc::now();
        if let Err(e) = self.deployments.update_deployment(&failed).await {
            warn!(
                deployment_id = %deployment_id,
                rollback_deployment_id = %rollback.deployment_id,
                error = %e,
                "Could not mark deployment failed, discarding rollback deployment"
            );
            self.planner.discard_deployment(&rollback).await;
            return Err(e);
        }

        info!(
            deployment_id = %deployment_id,
            rollback_deployment_id = %rollback.deployment_id,
            from_version = %release.version,
            to_version = %target.version,
            "Rolled back deployment"
        );
        Ok(rollback)
    }
}
