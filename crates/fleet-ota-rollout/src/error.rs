//! Error types for rollout orchestration
//!
//! Errors are classified into a closed set of [`ErrorKind`]s. Callers branch on
//! the kind (or match the variant), never on message text.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::model::DeploymentStatus;

/// What kind of record a not-found error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Firmware release metadata
    Release,
    /// Deployment record
    Deployment,
    /// Per-device update record
    DeviceUpdate,
    /// Stored firmware binary
    Binary,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Release => "Release",
            EntityKind::Deployment => "Deployment",
            EntityKind::DeviceUpdate => "Device update",
            EntityKind::Binary => "Binary",
        };
        f.write_str(name)
    }
}

/// Why a release failed integrity verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// Stored bytes no longer hash to the recorded digest
    #[error("binary hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Digest recorded at release creation
        expected: String,
        /// Digest of the bytes currently stored
        actual: String,
    },

    /// Hash matched but the signature does not verify
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
}

/// Closed classification of [`OtaError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller supplied bad input or asked for an invalid transition
    Validation,
    /// Referenced record does not exist
    NotFound,
    /// Device has nothing to install; an expected outcome
    NoPendingUpdate,
    /// Hash or signature check failed
    Integrity,
    /// Storage backend, registry or store unavailable
    Storage,
    /// Lost-update detected at the persistence layer
    Concurrency,
    /// Bug or unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoPendingUpdate => "no_pending_update",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Storage => "storage",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during release, deployment and device update operations
#[derive(Error, Debug)]
pub enum OtaError {
    /// Invalid input field
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Human-readable reason
        reason: String,
    },

    /// Release resolution produced no devices
    #[error("No target devices found for template {template_id} on channel {channel}")]
    NoTargetDevices {
        /// Template of the release
        template_id: String,
        /// Channel of the release
        channel: String,
    },

    /// Deployment is not in a state that allows the requested action
    #[error("Cannot {action} deployment {deployment_id} in status {status}")]
    InvalidTransition {
        /// Deployment being acted on
        deployment_id: String,
        /// Current status
        status: DeploymentStatus,
        /// Attempted action
        action: &'static str,
    },

    /// No older release exists to roll back to
    #[error("No previous release to roll back deployment {deployment_id} to")]
    NoRollbackTarget {
        /// Deployment that was asked to roll back
        deployment_id: String,
    },

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// Device has no update waiting for it
    #[error("No pending update for device: {0}")]
    NoPendingUpdate(String),

    /// Release failed integrity verification
    #[error("Integrity check failed for release {release_id}: {failure}")]
    Integrity {
        /// Release being verified
        release_id: String,
        /// What failed
        failure: IntegrityFailure,
    },

    /// Storage backend or store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Storage call exceeded its time budget
    #[error("Storage operation {operation} timed out after {timeout:?}")]
    StorageTimeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured timeout
        timeout: Duration,
    },

    /// Optimistic version check failed
    #[error(
        "Concurrent modification of deployment {deployment_id}: expected version {expected}, found {actual}"
    )]
    Concurrency {
        /// Deployment whose write was rejected
        deployment_id: String,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Signing failed while creating a release
    #[error("Signing error: {0}")]
    Signing(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OtaError {
    /// Build a validation error for `field`
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        OtaError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a not-found error
    #[must_use]
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        OtaError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Build a storage error
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        OtaError::Storage(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            OtaError::Validation { .. }
            | OtaError::NoTargetDevices { .. }
            | OtaError::InvalidTransition { .. }
            | OtaError::NoRollbackTarget { .. } => ErrorKind::Validation,
            OtaError::NotFound { .. } => ErrorKind::NotFound,
            OtaError::NoPendingUpdate(_) => ErrorKind::NoPendingUpdate,
            OtaError::Integrity { .. } => ErrorKind::Integrity,
            OtaError::Storage(_) | OtaError::StorageTimeout { .. } => ErrorKind::Storage,
            OtaError::Concurrency { .. } => ErrorKind::Concurrency,
            OtaError::Signing(_) | OtaError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Only transient infrastructure failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    /// Integrity failures must never be silently ignored
    pub fn is_security_relevant(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }

    /// True when this is a not-found for the given entity kind
    pub fn is_not_found(&self, kind: EntityKind) -> bool {
        matches!(self, OtaError::NotFound { entity, .. } if *entity == kind)
    }
}

impl From<std::io::Error> for OtaError {
    fn from(e: std::io::Error) -> Self {
        OtaError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(e: serde_json::Error) -> Self {
        OtaError::Serialization(e.to_string())
    }
}

impl From<fleet_ota_crypto::CryptoError> for OtaError {
    fn from(e: fleet_ota_crypto::CryptoError) -> Self {
        OtaError::Signing(e.to_string())
    }
}

/// Result type for rollout operations
pub type OtaResult<T> = std::result::Result<T, OtaError>;
