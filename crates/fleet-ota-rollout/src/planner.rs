//! Deployment creation and pause/resume
//!
//! A deployment's target set is resolved exactly once, here. Later changes to
//! the fleet need a new deployment.

use chrono::Utc;
use fleet_ota_crypto::utils::compute_sha256_hex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RolloutConfig;
use crate::error::{OtaError, OtaResult};
use crate::locks::DeploymentLocks;
use crate::model::{
    DeploymentConfig, DeploymentStatus, DeploymentStrategy, DeviceUpdate, FirmwareRelease,
    OtaDeployment,
};
use crate::registry::{DeviceFilter, DeviceRegistry};
use crate::release::ReleaseManager;
use crate::store::DeploymentStore;
use crate::tracker::DeviceUpdateTracker;

/// Number of devices a staged deployment targets: `floor(pct/100 * n)`, at least
/// one whenever the percentage is positive
pub fn staged_target_count(candidates: usize, percentage: u32) -> usize {
    if candidates == 0 || percentage == 0 {
        return 0;
    }
    let percentage = usize::try_from(percentage.min(100)).unwrap_or(100);
    (candidates.saturating_mul(percentage) / 100).max(1)
}

/// Pick the target set for a deployment.
///
/// Staged selection orders candidates by `sha256(release_id:device_id)` so the
/// same release always picks the same cohort while different releases spread
/// over the fleet.
pub fn select_targets(
    strategy: DeploymentStrategy,
    rollout_percentage: u32,
    release_id: &str,
    candidates: Vec<String>,
) -> Vec<String> {
    match strategy {
        DeploymentStrategy::Immediate | DeploymentStrategy::Canary => candidates,
        DeploymentStrategy::Staged => {
            let count = staged_target_count(candidates.len(), rollout_percentage);
            let mut ranked: Vec<(String, String)> = candidates
                .into_iter()
                .map(|device| {
                    let rank = compute_sha256_hex(format!("{}:{}", release_id, device).as_bytes());
                    (rank, device)
                })
                .collect();
            ranked.sort();
            ranked
                .into_iter()
                .take(count)
                .map(|(_, device)| device)
                .collect()
        }
    }
}

fn dedup_preserving_order(devices: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && seen.insert(d.clone()))
        .collect()
}

/// Resolves target devices and persists new deployments
pub struct DeploymentPlanner {
    releases: Arc<ReleaseManager>,
    deployments: Arc<dyn DeploymentStore>,
    tracker: Arc<DeviceUpdateTracker>,
    registry: Arc<dyn DeviceRegistry>,
    locks: Arc<DeploymentLocks>,
    config: RolloutConfig,
}

impl DeploymentPlanner {
    /// Create a planner
    pub fn new(
        releases: Arc<ReleaseManager>,
        deployments: Arc<dyn DeploymentStore>,
        tracker: Arc<DeviceUpdateTracker>,
        registry: Arc<dyn DeviceRegistry>,
        locks: Arc<DeploymentLocks>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            releases,
            deployments,
            tracker,
            registry,
            locks,
            config,
        }
    }

    fn normalize(&self, mut config: DeploymentConfig) -> OtaResult<DeploymentConfig> {
        if config.rollout_percentage > 100 {
            return Err(OtaError::validation(
                "rollout_percentage",
                "must be between 0 and 100",
            ));
        }
        if config.strategy == DeploymentStrategy::Staged && config.rollout_percentage == 0 {
            return Err(OtaError::validation(
                "rollout_percentage",
                "staged deployments need a percentage between 1 and 100",
            ));
        }
        if config.failure_threshold > 100 {
            return Err(OtaError::validation(
                "failure_threshold",
                "must be between 0 and 100",
            ));
        }
        if config.failure_threshold == 0 {
            config.failure_threshold = self.config.default_failure_threshold;
        }
        Ok(config)
    }

    async fn resolve_candidates(
        &self,
        release: &FirmwareRelease,
        config: &DeploymentConfig,
    ) -> OtaResult<Vec<String>> {
        if let Some(explicit) = &config.target_devices
            && !explicit.is_empty()
        {
            return Ok(dedup_preserving_order(explicit.iter().cloned()));
        }

        let filter = DeviceFilter::for_release(&release.template_id, release.channel);
        let devices = self.registry.list_devices(&filter).await?;
        Ok(dedup_preserving_order(
            devices.into_iter().map(|d| d.device_id),
        ))
    }

    /// Create a deployment of `release_id` and a pending update record per target device.
    ///
    /// The stored binary is re-hashed and its signature checked first; an
    /// integrity failure rejects the deployment.
    ///
    /// Immediate deployments start `active`; staged and canary deployments start
    /// `pending` and wait for activation. Nothing is persisted when any step fails.
    pub async fn deploy_release(
        &self,
        release_id: &str,
        config: DeploymentConfig,
    ) -> OtaResult<OtaDeployment> {
        let config = self.normalize(config)?;
        let release = self.releases.get_release(release_id).await?;
        // a release that fails verification never reaches a device
        self.releases.verify_stored_binary(&release).await?;

        let candidates = self.resolve_candidates(&release, &config).await?;
        if candidates.is_empty() {
            return Err(OtaError::NoTargetDevices {
                template_id: release.template_id.clone(),
                channel: release.channel.to_string(),
            });
        }
        let candidate_count = candidates.len();

        let target_devices = select_targets(
            config.strategy,
            config.rollout_percentage,
            &release.release_id,
            candidates,
        );

        let now = Utc::now();
        let status = match config.strategy {
            DeploymentStrategy::Immediate => DeploymentStatus::Active,
            DeploymentStrategy::Staged | DeploymentStrategy::Canary => DeploymentStatus::Pending,
        };

        let deployment = OtaDeployment {
            deployment_id: uuid::Uuid::new_v4().to_string(),
            release_id: release.release_id.clone(),
            strategy: config.strategy,
            rollout_percentage: config.rollout_percentage,
            target_devices,
            status,
            failure_threshold: config.failure_threshold,
            success_count: 0,
            failure_count: 0,
            version: 0,
            rolled_back_by: None,
            created_at: now,
            updated_at: now,
        };

        self.deployments.create_deployment(&deployment).await?;

        let mut created: Vec<&str> = Vec::with_capacity(deployment.target_devices.len());
        for device_id in &deployment.target_devices {
            let update = DeviceUpdate::pending(
                device_id.as_str(),
                deployment.release_id.as_str(),
                deployment.deployment_id.as_str(),
                now,
            );
            if let Err(e) = self.tracker.create_device_update(&update).await {
                warn!(
                    deployment_id = %deployment.deployment_id,
                    device_id = %device_id,
                    error = %e,
                    "Creating device update failed, unwinding deployment"
                );
                self.unwind(&deployment, &created).await;
                return Err(e);
            }
            created.push(device_id);
        }

        info!(
            deployment_id = %deployment.deployment_id,
            release_id = %deployment.release_id,
            strategy = %deployment.strategy,
            status = %deployment.status,
            "Created deployment targeting {} of {} candidate devices",
            deployment.target_devices.len(),
            candidate_count
        );
        Ok(deployment)
    }

    /// Remove a deployment and every update record it created
    pub(crate) async fn discard_deployment(&self, deployment: &OtaDeployment) {
        let created: Vec<&str> = deployment
            .target_devices
            .iter()
            .map(String::as_str)
            .collect();
        self.unwind(deployment, &created).await;
    }

    async fn unwind(&self, deployment: &OtaDeployment, created: &[&str]) {
        for device_id in created {
            if let Err(e) = self
                .tracker
                .discard_device_update(device_id, &deployment.release_id)
                .await
            {
                warn!(device_id = %device_id, error = %e, "Failed to remove device update");
            }
        }
        if let Err(e) = self
            .deployments
            .delete_deployment(&deployment.deployment_id)
            .await
        {
            warn!(
                deployment_id = %deployment.deployment_id,
                error = %e,
                "Failed to remove partially created deployment"
            );
        }
    }

    /// Fetch a deployment
    pub async fn get_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        self.deployments.get_deployment(deployment_id).await
    }

    /// Deployments of a release, newest first
    pub async fn list_deployments(&self, release_id: &str) -> OtaResult<Vec<OtaDeployment>> {
        self.deployments.list_deployments(release_id).await
    }

    /// Deployments currently handing out updates
    pub async fn get_active_deployments(&self) -> OtaResult<Vec<OtaDeployment>> {
        self.deployments.get_active_deployments().await
    }

    /// Stop handing out updates; only valid while active
    pub async fn pause_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        self.transition(
            deployment_id,
            DeploymentStatus::Active,
            DeploymentStatus::Paused,
            "pause",
        )
        .await
    }

    /// Resume handing out updates; only valid while paused
    pub async fn resume_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        self.transition(
            deployment_id,
            DeploymentStatus::Paused,
            DeploymentStatus::Active,
            "resume",
        )
        .await
    }

    async fn transition(
        &self,
        deployment_id: &str,
        from: DeploymentStatus,
        to: DeploymentStatus,
        action: &'static str,
    ) -> OtaResult<OtaDeployment> {
        let _guard = self.locks.lock(deployment_id).await;

        let mut deployment = self.deployments.get_deployment(deployment_id).await?;
        if deployment.status != from {
            return Err(OtaError::InvalidTransition {
                deployment_id: deployment_id.to_string(),
                status: deployment.status,
                action,
            });
        }

        deployment.status = to;
        deployment.updated_at = Utc::now();
        let deployment = self.deployments.update_deployment(&deployment).await?;

        info!(deployment_id = %deployment_id, "Deployment {} -> {}", from, to);
        debug!(version = deployment.version, "Deployment record written");
        Ok(deployment)
    }
}
