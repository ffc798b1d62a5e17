//! Convenience re-exports for common rollout types

pub use crate::config::RolloutConfig;
pub use crate::controller::{ReportOutcome, RolloutController};
pub use crate::device_api::DeviceUpdateApi;
pub use crate::error::{EntityKind, ErrorKind, OtaError, OtaResult};
pub use crate::model::{
    CreateReleaseRequest, DeploymentConfig, DeploymentStatus, DeploymentStatusReport,
    DeploymentStrategy, DeviceUpdate, FirmwareRelease, OtaDeployment, PendingUpdate,
    ReleaseChannel, UpdateStatus, UpdateStatusReport,
};
pub use crate::planner::DeploymentPlanner;
pub use crate::registry::{DeviceFilter, DeviceRecord, DeviceRegistry, InMemoryDeviceRegistry};
pub use crate::release::ReleaseManager;
pub use crate::rollback::RollbackEngine;
pub use crate::service::{OtaService, OtaServiceBuilder};
pub use crate::storage::{LocalStorageBackend, MemoryStorageBackend, StorageBackend};
pub use crate::store::{DeploymentStore, DeviceUpdateStore, MemoryStore, ReleaseStore};
pub use crate::tracker::DeviceUpdateTracker;
pub use fleet_ota_crypto::{Ed25519FirmwareSigner, FirmwareSigner};
