//! Per-deployment write serialization
//!
//! Every read-modify-write of a deployment record (status reports, pause,
//! resume, activation, rollback) holds that deployment's lock. Deployments
//! never contend with each other.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock table keyed by deployment ID
#[derive(Debug, Default)]
pub struct DeploymentLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DeploymentLocks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `deployment_id`
    pub async fn lock(&self, deployment_id: &str) -> DeploymentGuard<'_> {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(
                table
                    .entry(deployment_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = entry.lock_owned().await;

        DeploymentGuard {
            locks: self,
            deployment_id: deployment_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of deployments with a live lock entry
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether no lock entries are live
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    fn release(&self, deployment_id: &str) {
        let mut table = self.table.lock();
        // The table's own reference is the last one: nobody holds or waits on it
        if let Some(entry) = table.get(deployment_id)
            && Arc::strong_count(entry) == 1
        {
            table.remove(deployment_id);
        }
    }
}

/// Exclusive access to one deployment; idle entries are pruned on drop
#[derive(Debug)]
pub struct DeploymentGuard<'a> {
    locks: &'a DeploymentLocks,
    deployment_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DeploymentGuard<'_> {
    /// Deployment this guard protects
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }
}

impl Drop for DeploymentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.deployment_id);
    }
}
