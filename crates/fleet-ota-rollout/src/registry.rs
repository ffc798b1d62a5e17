//! Device registry seam
//!
//! The registry is owned by another subsystem. Rollouts only ask it which
//! devices run a template on a channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{OtaError, OtaResult};
use crate::model::ReleaseChannel;

/// A device as seen by the rollout core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device identifier
    pub device_id: String,
    /// Template the device was provisioned from
    pub template_id: String,
    /// Channel the device follows
    pub ota_channel: ReleaseChannel,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceRecord {
    /// Create a record
    pub fn new(
        device_id: impl Into<String>,
        template_id: impl Into<String>,
        ota_channel: ReleaseChannel,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            template_id: template_id.into(),
            ota_channel,
            name: None,
        }
    }
}

/// Registry query; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Required template
    pub template_id: Option<String>,
    /// Required channel
    pub ota_channel: Option<ReleaseChannel>,
}

impl DeviceFilter {
    /// Devices of `template_id` on `channel`
    pub fn for_release(template_id: impl Into<String>, channel: ReleaseChannel) -> Self {
        Self {
            template_id: Some(template_id.into()),
            ota_channel: Some(channel),
        }
    }

    /// Whether `device` satisfies the filter
    pub fn matches(&self, device: &DeviceRecord) -> bool {
        self.template_id
            .as_deref()
            .is_none_or(|t| t == device.template_id)
            && self.ota_channel.is_none_or(|c| c == device.ota_channel)
    }
}

/// External device registry
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// List devices matching `filter`
    async fn list_devices(&self, filter: &DeviceFilter) -> OtaResult<Vec<DeviceRecord>>;
}

/// Registry backed by an in-memory device list
#[derive(Debug, Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<Vec<DeviceRecord>>,
}

impl InMemoryDeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `devices`
    pub fn with_devices(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Load a JSON array of device records
    pub async fn load_from_path(path: &Path) -> OtaResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            OtaError::storage(format!("failed to read device list {}: {}", path.display(), e))
        })?;
        let devices: Vec<DeviceRecord> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} devices from {}",
            devices.len(),
            path.display()
        );
        Ok(Self::with_devices(devices))
    }

    /// Add or replace a device
    pub async fn register(&self, device: DeviceRecord) {
        let mut devices = self.devices.write().await;
        devices.retain(|d| d.device_id != device.device_id);
        devices.push(device);
    }

    /// Remove a device
    pub async fn unregister(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|d| d.device_id != device_id);
        devices.len() != before
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn list_devices(&self, filter: &DeviceFilter) -> OtaResult<Vec<DeviceRecord>> {
        Ok(self
            .devices
            .read()
            .await
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_filter_by_template_and_channel() -> OtaResult<()> {
        let registry = InMemoryDeviceRegistry::with_devices(vec![
            DeviceRecord::new("a", "esp32", ReleaseChannel::Stable),
            DeviceRecord::new("b", "esp32", ReleaseChannel::Beta),
            DeviceRecord::new("c", "rp2040", ReleaseChannel::Stable),
        ]);

        let stable = registry
            .list_devices(&DeviceFilter::for_release("esp32", ReleaseChannel::Stable))
            .await?;
        assert_eq!(stable.len(), 1);
        assert_eq!(stable.first().map(|d| d.device_id.as_str()), Some("a"));

        let all = registry.list_devices(&DeviceFilter::default()).await?;
        assert_eq!(all.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_replaces() -> OtaResult<()> {
        let registry = InMemoryDeviceRegistry::new();
        registry
            .register(DeviceRecord::new("a", "esp32", ReleaseChannel::Stable))
            .await;
        registry
            .register(DeviceRecord::new("a", "esp32", ReleaseChannel::Beta))
            .await;

        assert_eq!(registry.len().await, 1);
        let beta = registry
            .list_devices(&DeviceFilter::for_release("esp32", ReleaseChannel::Beta))
            .await?;
        assert_eq!(beta.len(), 1);

        assert!(registry.unregister("a").await);
        assert!(registry.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_from_path() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("fleet.json");
        tokio::fs::write(
            &path,
            r#"[{"device_id":"a","template_id":"esp32","ota_channel":"stable","name":"kitchen"}]"#,
        )
        .await?;

        let registry = InMemoryDeviceRegistry::load_from_path(&path).await?;
        assert_eq!(registry.len().await, 1);
        Ok(())
    }
}
