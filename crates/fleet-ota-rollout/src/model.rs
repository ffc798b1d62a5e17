//! Release, deployment and device update records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OtaError;

/// Named track a device subscribes to for updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    /// Production firmware
    Stable,
    /// Pre-release firmware for opted-in devices
    Beta,
    /// Experimental firmware
    Alpha,
}

impl ReleaseChannel {
    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseChannel::Stable => "stable",
            ReleaseChannel::Beta => "beta",
            ReleaseChannel::Alpha => "alpha",
        }
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseChannel {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(ReleaseChannel::Stable),
            "beta" => Ok(ReleaseChannel::Beta),
            "alpha" => Ok(ReleaseChannel::Alpha),
            other => Err(OtaError::validation(
                "channel",
                format!("unknown channel '{}', expected stable, beta or alpha", other),
            )),
        }
    }
}

/// How a deployment selects and releases its target devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStrategy {
    /// Every candidate, active immediately
    Immediate,
    /// A fixed percentage of the candidates, activated explicitly
    Staged,
    /// Every candidate, activated explicitly
    Canary,
}

impl DeploymentStrategy {
    /// Wire name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStrategy::Immediate => "immediate",
            DeploymentStrategy::Staged => "staged",
            DeploymentStrategy::Canary => "canary",
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStrategy {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(DeploymentStrategy::Immediate),
            "staged" => Ok(DeploymentStrategy::Staged),
            "canary" => Ok(DeploymentStrategy::Canary),
            other => Err(OtaError::validation(
                "strategy",
                format!(
                    "unknown strategy '{}', expected immediate, staged or canary",
                    other
                ),
            )),
        }
    }
}

/// Lifecycle state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created, waiting for activation
    Pending,
    /// Devices may fetch the update
    Active,
    /// Temporarily withheld from devices
    Paused,
    /// Every target device installed the update
    Completed,
    /// Failure threshold reached or rolled back
    Failed,
    /// Superseded by a rollback deployment
    RolledBack,
}

impl DeploymentStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Paused => "paused",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Terminal deployments never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one device through one update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    /// Assigned, not yet picked up
    Pending,
    /// Device is fetching the binary
    Downloading,
    /// Device is flashing the binary
    Installing,
    /// Update installed
    Completed,
    /// Update failed
    Failed,
}

impl UpdateStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Downloading => "downloading",
            UpdateStatus::Installing => "installing",
            UpdateStatus::Completed => "completed",
            UpdateStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateStatus::Completed | UpdateStatus::Failed)
    }

    /// Still counted as outstanding work
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            UpdateStatus::Pending => 0,
            UpdateStatus::Downloading => 1,
            UpdateStatus::Installing => 2,
            UpdateStatus::Completed => 3,
            UpdateStatus::Failed => 4,
        }
    }

    /// Whether moving from `self` to `next` goes forward along
    /// pending → downloading → installing → completed, or to failed
    pub fn can_advance_to(&self, next: UpdateStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == UpdateStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStatus {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(UpdateStatus::Pending),
            "downloading" => Ok(UpdateStatus::Downloading),
            "installing" => Ok(UpdateStatus::Installing),
            "completed" => Ok(UpdateStatus::Completed),
            "failed" => Ok(UpdateStatus::Failed),
            other => Err(OtaError::validation(
                "status",
                format!("unknown update status '{}'", other),
            )),
        }
    }
}

/// An immutable, signed firmware release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRelease {
    /// Generated identifier, not derived from content
    pub release_id: String,
    /// Device template this firmware targets
    pub template_id: String,
    /// Semantic version string
    pub version: String,
    /// Channel the release is published on
    pub channel: ReleaseChannel,
    /// Lowercase hex SHA-256 of the binary
    pub binary_hash: String,
    /// Opaque storage backend reference
    pub binary_path: String,
    /// Binary size in bytes
    pub binary_size: u64,
    /// Base64 signature over the binary
    pub signature: String,
    /// Free-form notes
    pub release_notes: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Operator who created the release
    pub created_by: String,
}

/// Input to release creation
#[derive(Debug, Clone, Default)]
pub struct CreateReleaseRequest {
    /// Device template
    pub template_id: String,
    /// Semantic version
    pub version: String,
    /// Channel name, validated on creation
    pub channel: String,
    /// Firmware image
    pub binary: Vec<u8>,
    /// Free-form notes
    pub release_notes: String,
    /// Operator creating the release
    pub created_by: String,
}

/// Operator-supplied deployment parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Target selection strategy
    pub strategy: DeploymentStrategy,
    /// Percentage of candidates for staged deployments
    #[serde(default)]
    pub rollout_percentage: u32,
    /// Percentage of target devices allowed to fail; 0 selects the configured default
    #[serde(default)]
    pub failure_threshold: u32,
    /// Explicit device set replacing registry resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_devices: Option<Vec<String>>,
}

impl DeploymentConfig {
    /// Deploy to every candidate at once
    pub fn immediate() -> Self {
        Self {
            strategy: DeploymentStrategy::Immediate,
            rollout_percentage: 100,
            failure_threshold: 0,
            target_devices: None,
        }
    }

    /// Deploy to `percentage` of the candidates
    pub fn staged(percentage: u32) -> Self {
        Self {
            strategy: DeploymentStrategy::Staged,
            rollout_percentage: percentage,
            failure_threshold: 0,
            target_devices: None,
        }
    }

    /// Deploy to every candidate, waiting for explicit activation
    pub fn canary() -> Self {
        Self {
            strategy: DeploymentStrategy::Canary,
            rollout_percentage: 100,
            failure_threshold: 0,
            target_devices: None,
        }
    }

    /// Set the failure threshold percentage
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Pin the target set instead of resolving it from the registry
    pub fn with_target_devices(mut self, devices: Vec<String>) -> Self {
        self.target_devices = Some(devices);
        self
    }
}

/// A rollout of one release to a frozen set of devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaDeployment {
    /// Generated identifier
    pub deployment_id: String,
    /// Release being deployed
    pub release_id: String,
    /// Selection strategy
    pub strategy: DeploymentStrategy,
    /// Percentage used for staged selection
    pub rollout_percentage: u32,
    /// Device set computed at creation, never recomputed
    pub target_devices: Vec<String>,
    /// Lifecycle status
    pub status: DeploymentStatus,
    /// Failure percentage that fails the deployment
    pub failure_threshold: u32,
    /// Devices that completed
    pub success_count: u32,
    /// Devices that failed
    pub failure_count: u32,
    /// Optimistic concurrency version, bumped on every write
    #[serde(default)]
    pub version: u64,
    /// Deployment created by rolling this one back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl OtaDeployment {
    /// Number of devices targeted
    pub fn total_devices(&self) -> u32 {
        u32::try_from(self.target_devices.len()).unwrap_or(u32::MAX)
    }

    /// Whether `failure_count` failures reach the threshold
    pub fn threshold_reached(&self, failure_count: u32) -> bool {
        let total = u64::from(self.total_devices());
        total > 0 && u64::from(failure_count) * 100 >= u64::from(self.failure_threshold) * total
    }
}

/// One device's progress through one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    /// Device being updated
    pub device_id: String,
    /// Release being installed
    pub release_id: String,
    /// Deployment that assigned the update
    pub deployment_id: String,
    /// Current status
    pub status: UpdateStatus,
    /// Progress percentage, 0 to 100
    pub progress: u8,
    /// When the record was assigned
    pub started_at: DateTime<Utc>,
    /// Set only on a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when failed
    pub error_message: Option<String>,
}

impl DeviceUpdate {
    /// Fresh pending record
    pub fn pending(
        device_id: impl Into<String>,
        release_id: impl Into<String>,
        deployment_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            release_id: release_id.into(),
            deployment_id: deployment_id.into(),
            status: UpdateStatus::Pending,
            progress: 0,
            started_at: now,
            completed_at: None,
            error_message: None,
        }
    }

    /// Composite key `(device_id, release_id)` rendered as a string
    pub fn key(&self) -> String {
        update_key(&self.device_id, &self.release_id)
    }

    /// Apply a device report, returning whether anything changed.
    ///
    /// Terminal records are never modified. Backward moves are ignored and a
    /// same-status report can only raise progress.
    pub fn apply_report(&mut self, report: &UpdateStatusReport, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if report.status == self.status {
            if report.progress > self.progress {
                self.progress = report.progress;
                return true;
            }
            return false;
        }

        if !self.status.can_advance_to(report.status) {
            return false;
        }

        self.status = report.status;
        self.progress = match report.status {
            UpdateStatus::Completed => 100,
            _ => report.progress,
        };
        self.error_message = match report.status {
            UpdateStatus::Failed => report.error_message.clone(),
            _ => None,
        };
        if report.status.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }
}

/// Composite key for device update records
pub fn update_key(device_id: &str, release_id: &str) -> String {
    format!("{}#{}", device_id, release_id)
}

/// Status report sent by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusReport {
    /// Reporting device
    pub device_id: String,
    /// Release the report is about
    pub release_id: String,
    /// New status
    pub status: UpdateStatus,
    /// Progress percentage, 0 to 100
    #[serde(default)]
    pub progress: u8,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Descriptor handed to a device that has an update waiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    /// Release to install
    pub release_id: String,
    /// Version string
    pub version: String,
    /// Time-limited download URL
    pub binary_url: String,
    /// Expected SHA-256 of the download
    pub binary_hash: String,
    /// Expected size in bytes
    pub binary_size: u64,
    /// Signature the device must verify
    pub signature: String,
    /// Release notes
    pub release_notes: String,
    /// Release creation time
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts derived from device update rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStats {
    /// Completed updates
    pub success_count: u32,
    /// Failed updates
    pub failure_count: u32,
    /// Pending, downloading or installing updates
    pub pending_count: u32,
}

/// Per-status breakdown of a deployment's device updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusCounts {
    /// Pending updates
    pub pending: u32,
    /// Downloading updates
    pub downloading: u32,
    /// Installing updates
    pub installing: u32,
    /// Completed updates
    pub completed: u32,
    /// Failed updates
    pub failed: u32,
}

impl UpdateStatusCounts {
    /// Classify every row
    pub fn from_updates<'a>(updates: impl IntoIterator<Item = &'a DeviceUpdate>) -> Self {
        let mut counts = Self::default();
        for update in updates {
            let slot = match update.status {
                UpdateStatus::Pending => &mut counts.pending,
                UpdateStatus::Downloading => &mut counts.downloading,
                UpdateStatus::Installing => &mut counts.installing,
                UpdateStatus::Completed => &mut counts.completed,
                UpdateStatus::Failed => &mut counts.failed,
            };
            *slot = slot.saturating_add(1);
        }
        counts
    }

    /// Collapse into success/failure/pending
    pub fn stats(&self) -> DeploymentStats {
        DeploymentStats {
            success_count: self.completed,
            failure_count: self.failed,
            pending_count: self
                .pending
                .saturating_add(self.downloading)
                .saturating_add(self.installing),
        }
    }
}

/// Read-only view of a deployment's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusReport {
    /// Deployment
    pub deployment_id: String,
    /// Release being deployed
    pub release_id: String,
    /// Current deployment status
    pub status: DeploymentStatus,
    /// Selection strategy
    pub strategy: DeploymentStrategy,
    /// Size of the target set
    pub total_devices: u32,
    /// Devices not yet started
    pub pending_count: u32,
    /// Devices downloading
    pub downloading_count: u32,
    /// Devices installing
    pub installing_count: u32,
    /// Devices done
    pub completed_count: u32,
    /// Devices failed
    pub failed_count: u32,
    /// round(completed / total * 100)
    pub progress_percentage: u8,
    /// Deployment creation time
    pub created_at: DateTime<Utc>,
    /// Deployment last modification time
    pub updated_at: DateTime<Utc>,
}

impl DeploymentStatusReport {
    /// Build the report from a deployment and its device update rows
    pub fn build(deployment: &OtaDeployment, updates: &[DeviceUpdate]) -> Self {
        let counts = UpdateStatusCounts::from_updates(updates);
        let total_devices = deployment.total_devices();

        Self {
            deployment_id: deployment.deployment_id.clone(),
            release_id: deployment.release_id.clone(),
            status: deployment.status,
            strategy: deployment.strategy,
            total_devices,
            pending_count: counts.pending,
            downloading_count: counts.downloading,
            installing_count: counts.installing,
            completed_count: counts.completed,
            failed_count: counts.failed,
            progress_percentage: rounded_percentage(counts.completed, total_devices),
            created_at: deployment.created_at,
            updated_at: deployment.updated_at,
        }
    }
}

/// `round(part / total * 100)` with halves rounded up, clamped to 100
pub fn rounded_percentage(part: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let total = u64::from(total);
    let pct = (u64::from(part) * 100 + total / 2) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}
