//! Firmware release creation, lookup and integrity verification

use chrono::Utc;
use fleet_ota_crypto::FirmwareSigner;
use fleet_ota_crypto::utils::{compute_sha256_hex, digests_match};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RolloutConfig;
use crate::error::{EntityKind, IntegrityFailure, OtaError, OtaResult};
use crate::model::{CreateReleaseRequest, FirmwareRelease, ReleaseChannel};
use crate::storage::{StorageBackend, with_timeout};
use crate::store::ReleaseStore;

/// Creates, retrieves, deletes and verifies releases
pub struct ReleaseManager {
    releases: Arc<dyn ReleaseStore>,
    storage: Arc<dyn StorageBackend>,
    signer: Arc<dyn FirmwareSigner>,
    config: RolloutConfig,
}

impl ReleaseManager {
    /// Create a manager
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        storage: Arc<dyn StorageBackend>,
        signer: Arc<dyn FirmwareSigner>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            releases,
            storage,
            signer,
            config,
        }
    }

    /// Hash, sign, store and persist a new release.
    ///
    /// The binary is stored before the metadata; if persisting the metadata
    /// fails the stored binary is deleted again.
    pub async fn create_release(&self, request: CreateReleaseRequest) -> OtaResult<FirmwareRelease> {
        let template_id = request.template_id.trim().to_string();
        let version = request.version.trim().to_string();

        if template_id.is_empty() {
            return Err(OtaError::validation("template_id", "must not be empty"));
        }
        if version.is_empty() {
            return Err(OtaError::validation("version", "must not be empty"));
        }
        if let Err(e) = semver::Version::parse(&version) {
            return Err(OtaError::validation(
                "version",
                format!("'{}' is not a semantic version: {}", version, e),
            ));
        }
        if request.binary.is_empty() {
            return Err(OtaError::validation("binary", "firmware binary is empty"));
        }
        if request.channel.trim().is_empty() {
            return Err(OtaError::validation("channel", "must not be empty"));
        }
        let channel: ReleaseChannel = request.channel.parse()?;

        let binary_hash = compute_sha256_hex(&request.binary);

        if self.config.deduplicate_binaries
            && let Some(existing) = self
                .releases
                .find_by_binary_hash(&template_id, &binary_hash)
                .await?
                .into_iter()
                .find(|r| r.channel == channel)
        {
            info!(
                release_id = %existing.release_id,
                "Binary already published as release {} {}, reusing it",
                existing.template_id,
                existing.version
            );
            return Ok(existing);
        }

        match self
            .releases
            .get_release_by_version(&template_id, &version, channel)
            .await
        {
            Ok(existing) => {
                return Err(OtaError::validation(
                    "version",
                    format!(
                        "{} {} already published on {} as {}",
                        template_id, version, channel, existing.release_id
                    ),
                ));
            }
            Err(e) if e.is_not_found(EntityKind::Release) => {}
            Err(e) => return Err(e),
        }

        let release_id = uuid::Uuid::new_v4().to_string();
        let signature = self.signer.sign(&request.binary)?;

        let binary_path = with_timeout(
            self.config.storage_timeout,
            "store_binary",
            self.storage.store_binary(&release_id, &request.binary),
        )
        .await?;

        let release = FirmwareRelease {
            release_id: release_id.clone(),
            template_id,
            version,
            channel,
            binary_hash,
            binary_path,
            binary_size: u64::try_from(request.binary.len()).unwrap_or(u64::MAX),
            signature,
            release_notes: request.release_notes,
            created_at: Utc::now(),
            created_by: request.created_by,
        };

        if let Err(e) = self.releases.create_release(&release).await {
            warn!(
                release_id = %release_id,
                error = %e,
                "Persisting release failed, removing stored binary"
            );
            if let Err(cleanup) = with_timeout(
                self.config.storage_timeout,
                "delete_binary",
                self.storage.delete_binary(&release.binary_path),
            )
            .await
            {
                warn!(
                    release_id = %release_id,
                    path = %release.binary_path,
                    error = %cleanup,
                    "Failed to delete orphaned binary"
                );
            }
            return Err(e);
        }

        info!(
            release_id = %release.release_id,
            template_id = %release.template_id,
            channel = %release.channel,
            size = release.binary_size,
            "Created release {}",
            release.version
        );
        Ok(release)
    }

    /// Fetch a release
    pub async fn get_release(&self, release_id: &str) -> OtaResult<FirmwareRelease> {
        self.releases.get_release(release_id).await
    }

    /// Releases for a template and channel, newest first
    pub async fn list_releases(
        &self,
        template_id: &str,
        channel: ReleaseChannel,
    ) -> OtaResult<Vec<FirmwareRelease>> {
        self.releases.list_releases(template_id, channel).await
    }

    /// Delete a release and its stored binary
    pub async fn delete_release(&self, release_id: &str) -> OtaResult<()> {
        let release = self.releases.get_release(release_id).await?;

        if let Err(e) = with_timeout(
            self.config.storage_timeout,
            "delete_binary",
            self.storage.delete_binary(&release.binary_path),
        )
        .await
        {
            warn!(
                release_id = %release_id,
                error = %e,
                "Failed to delete release binary"
            );
        }

        self.releases.delete_release(release_id).await?;
        info!(release_id = %release_id, "Deleted release {}", release.version);
        Ok(())
    }

    /// Recompute the stored binary's hash and check the signature.
    ///
    /// A hash mismatch fails before the signature is looked at.
    pub async fn verify_release(&self, release_id: &str) -> OtaResult<()> {
        let release = self.releases.get_release(release_id).await?;
        self.verify_stored_binary(&release).await?;
        info!(release_id = %release_id, "Release verified");
        Ok(())
    }

    /// Integrity check of an already loaded release against its stored binary
    pub async fn verify_stored_binary(&self, release: &FirmwareRelease) -> OtaResult<()> {
        let release_id = release.release_id.as_str();
        let binary = with_timeout(
            self.config.storage_timeout,
            "get_binary",
            self.storage.get_binary(&release.binary_path),
        )
        .await?;

        let actual = compute_sha256_hex(&binary);
        if !digests_match(&release.binary_hash, &actual) {
            warn!(release_id = %release_id, "Release binary hash mismatch");
            return Err(OtaError::Integrity {
                release_id: release_id.to_string(),
                failure: IntegrityFailure::HashMismatch {
                    expected: release.binary_hash.clone(),
                    actual,
                },
            });
        }

        match self.signer.verify(&binary, &release.signature) {
            Ok(()) => {}
            Err(e) if e.is_verification_failure() => {
                warn!(release_id = %release_id, error = %e, "Release signature invalid");
                return Err(OtaError::Integrity {
                    release_id: release_id.to_string(),
                    failure: IntegrityFailure::SignatureInvalid(e.to_string()),
                });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorageBackend;
    use crate::store::MemoryStore;
    use fleet_ota_crypto::Ed25519FirmwareSigner;

    struct Fixture {
        manager: ReleaseManager,
        store: Arc<MemoryStore>,
        storage: Arc<MemoryStorageBackend>,
    }

    fn fixture(config: RolloutConfig) -> OtaResult<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorageBackend::new());
        let signer = Arc::new(Ed25519FirmwareSigner::generate()?);
        let manager = ReleaseManager::new(store.clone(), storage.clone(), signer, config);
        Ok(Fixture {
            manager,
            store,
            storage,
        })
    }

    fn request(version: &str, binary: &[u8]) -> CreateReleaseRequest {
        CreateReleaseRequest {
            template_id: "esp32-sensor".to_string(),
            version: version.to_string(),
            channel: "stable".to_string(),
            binary: binary.to_vec(),
            release_notes: "notes".to_string(),
            created_by: "ops@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_release_populates_hash_and_signature() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        let release = fx.manager.create_release(request("1.0.0", b"image")).await?;

        assert_eq!(release.binary_hash, compute_sha256_hex(b"image"));
        assert_eq!(release.binary_size, 5);
        assert!(!release.signature.is_empty());
        assert!(fx.storage.contains(&release.binary_path).await);

        fx.manager.verify_release(&release.release_id).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_release_validation() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;

        let mut bad = request("1.0.0", b"image");
        bad.template_id = "  ".to_string();
        assert!(matches!(
            fx.manager.create_release(bad).await,
            Err(OtaError::Validation { ref field, .. }) if field == "template_id"
        ));

        let bad = request("", b"image");
        assert!(fx.manager.create_release(bad).await.is_err());

        let bad = request("not-semver", b"image");
        assert!(fx.manager.create_release(bad).await.is_err());

        let bad = request("1.0.0", b"");
        assert!(fx.manager.create_release(bad).await.is_err());

        let mut bad = request("1.0.0", b"image");
        bad.channel = String::new();
        assert!(matches!(
            fx.manager.create_release(bad).await,
            Err(OtaError::Validation { ref field, .. }) if field == "channel"
        ));

        let mut bad = request("1.0.0", b"image");
        bad.channel = "nightly".to_string();
        assert!(matches!(
            fx.manager.create_release(bad).await,
            Err(OtaError::Validation { ref field, .. }) if field == "channel"
        ));

        assert_eq!(fx.store.release_count().await, 0);
        assert!(fx.storage.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        fx.manager.create_release(request("1.0.0", b"a")).await?;

        let dup = fx.manager.create_release(request("1.0.0", b"b")).await;
        assert!(matches!(dup, Err(OtaError::Validation { .. })));
        assert_eq!(fx.storage.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_identical_binaries_get_distinct_ids_without_dedup() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        let a = fx.manager.create_release(request("1.0.0", b"same")).await?;
        let b = fx.manager.create_release(request("1.0.1", b"same")).await?;

        assert_ne!(a.release_id, b.release_id);
        assert_eq!(a.binary_hash, b.binary_hash);
        Ok(())
    }

    #[tokio::test]
    async fn test_dedup_returns_existing_release() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default().with_deduplicate_binaries(true))?;
        let a = fx.manager.create_release(request("1.0.0", b"same")).await?;
        let b = fx.manager.create_release(request("1.0.1", b"same")).await?;

        assert_eq!(a.release_id, b.release_id);
        assert_eq!(fx.store.release_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_detects_tampered_binary() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        let release = fx.manager.create_release(request("1.0.0", b"image")).await?;

        fx.storage
            .overwrite(&release.binary_path, b"imagf".to_vec())
            .await;

        let err = fx.manager.verify_release(&release.release_id).await;
        assert!(matches!(
            err,
            Err(OtaError::Integrity {
                failure: IntegrityFailure::HashMismatch { .. },
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_detects_bad_signature() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        let release = fx.manager.create_release(request("1.0.0", b"image")).await?;

        // Re-sign with a different key but keep the hash intact
        let other = Ed25519FirmwareSigner::generate()?;
        let mut forged = release.clone();
        forged.release_id = "forged".to_string();
        forged.version = "1.0.1".to_string();
        forged.signature = other.sign(b"image")?;
        fx.store.create_release(&forged).await?;

        let err = fx.manager.verify_release("forged").await;
        assert!(matches!(
            err,
            Err(OtaError::Integrity {
                failure: IntegrityFailure::SignatureInvalid(_),
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_release_removes_binary() -> OtaResult<()> {
        let fx = fixture(RolloutConfig::default())?;
        let release = fx.manager.create_release(request("1.0.0", b"image")).await?;

        fx.manager.delete_release(&release.release_id).await?;
        assert!(!fx.storage.contains(&release.binary_path).await);

        let missing = fx.manager.get_release(&release.release_id).await;
        assert!(matches!(missing, Err(ref e) if e.is_not_found(EntityKind::Release)));

        let again = fx.manager.delete_release(&release.release_id).await;
        assert!(matches!(again, Err(ref e) if e.is_not_found(EntityKind::Release)));
        Ok(())
    }
}
