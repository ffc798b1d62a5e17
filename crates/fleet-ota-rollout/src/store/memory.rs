//! In-memory implementation of every store trait

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{DeploymentStore, DeviceUpdateStore, ReleaseStore};
use crate::error::{EntityKind, OtaError, OtaResult};
use crate::model::{
    DeploymentStats, DeploymentStatus, DeviceUpdate, FirmwareRelease, OtaDeployment,
    ReleaseChannel, UpdateStatus, UpdateStatusCounts, update_key,
};

#[derive(Debug, Clone)]
struct StoredUpdate {
    update: DeviceUpdate,
    // Insertion order, breaks ties between equal `started_at`
    seq: u64,
}

/// Releases, deployments and device updates held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    releases: RwLock<HashMap<String, FirmwareRelease>>,
    deployments: RwLock<HashMap<String, OtaDeployment>>,
    updates: RwLock<HashMap<String, StoredUpdate>>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored releases
    pub async fn release_count(&self) -> usize {
        self.releases.read().await.len()
    }

    /// Number of stored deployments
    pub async fn deployment_count(&self) -> usize {
        self.deployments.read().await.len()
    }

    /// Number of stored device update records
    pub async fn device_update_count(&self) -> usize {
        self.updates.read().await.len()
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn create_release(&self, release: &FirmwareRelease) -> OtaResult<()> {
        let mut releases = self.releases.write().await;
        if releases.contains_key(&release.release_id) {
            return Err(OtaError::validation(
                "release_id",
                format!("release {} already exists", release.release_id),
            ));
        }
        releases.insert(release.release_id.clone(), release.clone());
        Ok(())
    }

    async fn get_release(&self, release_id: &str) -> OtaResult<FirmwareRelease> {
        self.releases
            .read()
            .await
            .get(release_id)
            .cloned()
            .ok_or_else(|| OtaError::not_found(EntityKind::Release, release_id))
    }

    async fn get_release_by_version(
        &self,
        template_id: &str,
        version: &str,
        channel: ReleaseChannel,
    ) -> OtaResult<FirmwareRelease> {
        self.releases
            .read()
            .await
            .values()
            .find(|r| r.template_id == template_id && r.version == version && r.channel == channel)
            .cloned()
            .ok_or_else(|| {
                OtaError::not_found(
                    EntityKind::Release,
                    format!("{}@{} ({})", template_id, version, channel),
                )
            })
    }

    async fn list_releases(
        &self,
        template_id: &str,
        channel: ReleaseChannel,
    ) -> OtaResult<Vec<FirmwareRelease>> {
        let mut releases: Vec<FirmwareRelease> = self
            .releases
            .read()
            .await
            .values()
            .filter(|r| r.template_id == template_id && r.channel == channel)
            .cloned()
            .collect();
        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(releases)
    }

    async fn delete_release(&self, release_id: &str) -> OtaResult<()> {
        self.releases
            .write()
            .await
            .remove(release_id)
            .map(|_| ())
            .ok_or_else(|| OtaError::not_found(EntityKind::Release, release_id))
    }

    async fn release_exists(&self, release_id: &str) -> OtaResult<bool> {
        Ok(self.releases.read().await.contains_key(release_id))
    }

    async fn find_by_binary_hash(
        &self,
        template_id: &str,
        binary_hash: &str,
    ) -> OtaResult<Vec<FirmwareRelease>> {
        let mut releases: Vec<FirmwareRelease> = self
            .releases
            .read()
            .await
            .values()
            .filter(|r| r.template_id == template_id && r.binary_hash == binary_hash)
            .cloned()
            .collect();
        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(releases)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create_deployment(&self, deployment: &OtaDeployment) -> OtaResult<()> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&deployment.deployment_id) {
            return Err(OtaError::validation(
                "deployment_id",
                format!("deployment {} already exists", deployment.deployment_id),
            ));
        }
        deployments.insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, deployment_id: &str) -> OtaResult<OtaDeployment> {
        self.deployments
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| OtaError::not_found(EntityKind::Deployment, deployment_id))
    }

    async fn update_deployment(&self, deployment: &OtaDeployment) -> OtaResult<OtaDeployment> {
        let mut deployments = self.deployments.write().await;
        let stored = deployments
            .get_mut(&deployment.deployment_id)
            .ok_or_else(|| OtaError::not_found(EntityKind::Deployment, &deployment.deployment_id))?;

        if stored.version != deployment.version {
            return Err(OtaError::Concurrency {
                deployment_id: deployment.deployment_id.clone(),
                expected: deployment.version,
                actual: stored.version,
            });
        }

        let mut next = deployment.clone();
        next.version = stored.version.saturating_add(1);
        *stored = next.clone();
        Ok(next)
    }

    async fn list_deployments(&self, release_id: &str) -> OtaResult<Vec<OtaDeployment>> {
        let mut deployments: Vec<OtaDeployment> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.release_id == release_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn get_active_deployments(&self) -> OtaResult<Vec<OtaDeployment>> {
        let mut deployments: Vec<OtaDeployment> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.status == DeploymentStatus::Active)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn delete_deployment(&self, deployment_id: &str) -> OtaResult<()> {
        self.deployments
            .write()
            .await
            .remove(deployment_id)
            .map(|_| ())
            .ok_or_else(|| OtaError::not_found(EntityKind::Deployment, deployment_id))
    }
}

#[async_trait]
impl DeviceUpdateStore for MemoryStore {
    async fn create_device_update(&self, update: &DeviceUpdate) -> OtaResult<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.updates.write().await.insert(
            update.key(),
            StoredUpdate {
                update: update.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get_device_update(
        &self,
        device_id: &str,
        release_id: &str,
    ) -> OtaResult<DeviceUpdate> {
        let key = update_key(device_id, release_id);
        self.updates
            .read()
            .await
            .get(&key)
            .map(|stored| stored.update.clone())
            .ok_or_else(|| OtaError::not_found(EntityKind::DeviceUpdate, key))
    }

    async fn get_latest_update_for_device(
        &self,
        device_id: &str,
    ) -> OtaResult<Option<DeviceUpdate>> {
        Ok(self
            .updates
            .read()
            .await
            .values()
            .filter(|stored| stored.update.device_id == device_id)
            .max_by(|a, b| {
                a.update
                    .started_at
                    .cmp(&b.update.started_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|stored| stored.update.clone()))
    }

    async fn update_device_update(&self, update: &DeviceUpdate) -> OtaResult<()> {
        let key = update.key();
        let mut updates = self.updates.write().await;
        let stored = updates
            .get_mut(&key)
            .ok_or_else(|| OtaError::not_found(EntityKind::DeviceUpdate, &key))?;
        stored.update = update.clone();
        Ok(())
    }

    async fn list_device_updates(&self, deployment_id: &str) -> OtaResult<Vec<DeviceUpdate>> {
        let mut rows: Vec<(u64, DeviceUpdate)> = self
            .updates
            .read()
            .await
            .values()
            .filter(|stored| stored.update.deployment_id == deployment_id)
            .map(|stored| (stored.seq, stored.update.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, update)| update).collect())
    }

    async fn get_deployment_stats(&self, deployment_id: &str) -> OtaResult<DeploymentStats> {
        let updates = self.updates.read().await;
        let rows = updates
            .values()
            .map(|stored| &stored.update)
            .filter(|update| update.deployment_id == deployment_id);
        Ok(UpdateStatusCounts::from_updates(rows).stats())
    }

    async fn get_device_updates_by_status(
        &self,
        deployment_id: &str,
        status: UpdateStatus,
    ) -> OtaResult<Vec<DeviceUpdate>> {
        Ok(self
            .list_device_updates(deployment_id)
            .await?
            .into_iter()
            .filter(|update| update.status == status)
            .collect())
    }

    async fn get_devices_pending_update(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> OtaResult<Vec<String>> {
        Ok(self
            .list_device_updates(deployment_id)
            .await?
            .into_iter()
            .filter(|update| update.status == UpdateStatus::Pending)
            .take(limit)
            .map(|update| update.device_id)
            .collect())
    }

    async fn delete_device_update(&self, device_id: &str, release_id: &str) -> OtaResult<()> {
        let key = update_key(device_id, release_id);
        self.updates
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| OtaError::not_found(EntityKind::DeviceUpdate, key))
    }
}
