//! Rollout tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OtaError, OtaResult};

/// Failure threshold applied when a deployment does not specify one
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Configuration shared by every rollout component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Threshold (percent) used when a deployment config passes 0
    pub default_failure_threshold: u32,

    /// Lifetime of download URLs handed to devices
    #[serde(with = "duration_serde")]
    pub download_url_expiry: Duration,

    /// Upper bound for every storage backend call
    #[serde(with = "duration_serde")]
    pub storage_timeout: Duration,

    /// Roll back automatically when a deployment crosses its failure threshold
    pub auto_rollback: bool,

    /// Return the existing release when the same binary is uploaded again
    /// for the same template and channel
    pub deduplicate_binaries: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            default_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            download_url_expiry: Duration::from_secs(3600),
            storage_timeout: Duration::from_secs(30),
            auto_rollback: false,
            deduplicate_binaries: false,
        }
    }
}

impl RolloutConfig {
    /// Set the default failure threshold
    pub fn with_default_failure_threshold(mut self, threshold: u32) -> Self {
        self.default_failure_threshold = threshold;
        self
    }

    /// Set the download URL lifetime
    pub fn with_download_url_expiry(mut self, expiry: Duration) -> Self {
        self.download_url_expiry = expiry;
        self
    }

    /// Set the storage call timeout
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Enable or disable automatic rollback
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = enabled;
        self
    }

    /// Enable or disable binary deduplication
    pub fn with_deduplicate_binaries(mut self, enabled: bool) -> Self {
        self.deduplicate_binaries = enabled;
        self
    }

    /// Reject settings that would make the service misbehave
    pub fn validate(&self) -> OtaResult<()> {
        if self.default_failure_threshold == 0 || self.default_failure_threshold > 100 {
            return Err(OtaError::validation(
                "default_failure_threshold",
                "must be between 1 and 100",
            ));
        }
        if self.download_url_expiry.is_zero() {
            return Err(OtaError::validation(
                "download_url_expiry",
                "must be greater than zero",
            ));
        }
        if self.storage_timeout.is_zero() {
            return Err(OtaError::validation(
                "storage_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
