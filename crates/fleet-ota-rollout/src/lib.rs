//! Firmware rollout orchestration for device fleets
//!
//! This crate turns uploaded firmware into signed releases, decides which
//! devices receive a release, and drives each deployment through its lifecycle
//! from `pending` to `completed`, `failed` or a rollback.
//!
//! # Architecture
//!
//! - [`release`]: [`ReleaseManager`] hashes, signs, stores and verifies releases
//! - [`planner`]: [`DeploymentPlanner`] resolves target devices and creates deployments
//! - [`controller`]: [`RolloutController`] applies device reports and derives deployment status
//! - [`tracker`]: [`DeviceUpdateTracker`] owns per-device update records
//! - [`rollback`]: [`RollbackEngine`] republishes the previous release
//! - [`device_api`]: [`DeviceUpdateApi`] is what devices poll and report to
//! - [`service`]: [`OtaService`] wires all of the above over shared stores
//!
//! Collaborators sit behind traits: [`store`] for persistence, [`storage`] for
//! binaries, [`registry`] for the device fleet and
//! [`fleet_ota_crypto::FirmwareSigner`] for signatures.
//!
//! # Example
//!
//! ```
//! use fleet_ota_rollout::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = InMemoryDeviceRegistry::with_devices(vec![DeviceRecord::new(
//!     "sensor-01",
//!     "env-sensor",
//!     ReleaseChannel::Stable,
//! )]);
//! let service = OtaService::builder()
//!     .signer(Arc::new(Ed25519FirmwareSigner::generate()?))
//!     .registry(Arc::new(registry))
//!     .build()?;
//!
//! let release = service
//!     .releases()
//!     .create_release(CreateReleaseRequest {
//!         template_id: "env-sensor".to_string(),
//!         version: "1.2.0".to_string(),
//!         channel: "stable".to_string(),
//!         binary: b"firmware image".to_vec(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! service
//!     .planner()
//!     .deploy_release(&release.release_id, DeploymentConfig::immediate())
//!     .await?;
//!
//! let update = service.device_api().get_update_for_device("sensor-01").await?;
//! assert_eq!(update.version, "1.2.0");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod controller;
pub mod device_api;
pub mod error;
pub mod locks;
pub mod model;
pub mod planner;
pub mod prelude;
pub mod registry;
pub mod release;
pub mod rollback;
pub mod service;
pub mod storage;
pub mod store;
pub mod tracker;

pub use config::{DEFAULT_FAILURE_THRESHOLD, RolloutConfig};
pub use controller::{ReportOutcome, RolloutController, derive_status};
pub use device_api::DeviceUpdateApi;
pub use error::{EntityKind, ErrorKind, IntegrityFailure, OtaError, OtaResult};
pub use locks::{DeploymentGuard, DeploymentLocks};
pub use model::{
    CreateReleaseRequest, DeploymentConfig, DeploymentStats, DeploymentStatus,
    DeploymentStatusReport, DeploymentStrategy, DeviceUpdate, FirmwareRelease, OtaDeployment,
    PendingUpdate, ReleaseChannel, UpdateStatus, UpdateStatusCounts, UpdateStatusReport,
};
pub use planner::{DeploymentPlanner, select_targets, staged_target_count};
pub use registry::{DeviceFilter, DeviceRecord, DeviceRegistry, InMemoryDeviceRegistry};
pub use release::ReleaseManager;
pub use rollback::{RollbackEngine, previous_release};
pub use service::{OtaService, OtaServiceBuilder};
pub use storage::{LocalStorageBackend, MemoryStorageBackend, StorageBackend};
pub use store::{DeploymentStore, DeviceUpdateStore, MemoryStore, ReleaseStore};
pub use tracker::DeviceUpdateTracker;
