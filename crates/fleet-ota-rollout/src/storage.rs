//! Binary object storage for firmware images
//!
//! Release management stores each binary once and keeps only the opaque path
//! the backend returns. Devices never see the path; they receive a
//! time-limited URL from [`StorageBackend::get_binary_url`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EntityKind, OtaError, OtaResult};

const BINARY_FILE_NAME: &str = "firmware.bin";

/// Firmware binary storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store the binary for a release and return its opaque path
    async fn store_binary(&self, release_id: &str, data: &[u8]) -> OtaResult<String>;

    /// Read a stored binary
    async fn get_binary(&self, path: &str) -> OtaResult<Vec<u8>>;

    /// URL a device can download the binary from until `expiry` elapses
    async fn get_binary_url(&self, path: &str, expiry: Duration) -> OtaResult<String>;

    /// Delete a stored binary; deleting a missing binary succeeds
    async fn delete_binary(&self, path: &str) -> OtaResult<()>;
}

/// Run a storage call with an upper time bound.
///
/// Dropping the returned future cancels the underlying call.
pub async fn with_timeout<T, F>(timeout: Duration, operation: &'static str, call: F) -> OtaResult<T>
where
    F: Future<Output = OtaResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(OtaError::StorageTimeout { operation, timeout }),
    }
}

/// HMAC token binding a download path to an expiry time, keyed by the URL secret
pub fn download_token(secret: &str, path: &str, expires_at: i64) -> OtaResult<String> {
    let payload = format!("{}:{}", path, expires_at);
    Ok(fleet_ota_crypto::utils::compute_hmac_sha256_hex(
        secret.as_bytes(),
        payload.as_bytes(),
    )?)
}

/// Check a download token produced by [`download_token`]
pub fn verify_download_token(
    secret: &str,
    path: &str,
    expires_at: i64,
    token: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    if now.timestamp() >= expires_at {
        return false;
    }
    match download_token(secret, path, expires_at) {
        Ok(expected) => fleet_ota_crypto::utils::digests_match(&expected, token),
        Err(_) => false,
    }
}

fn expiry_timestamp(expiry: Duration) -> i64 {
    let secs = i64::try_from(expiry.as_secs()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp().saturating_add(secs)
}

/// Reject anything that is not a plain relative path below the storage root
fn validate_relative_path(path: &str) -> OtaResult<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(OtaError::validation(
            "binary_path",
            format!("'{}' is not a relative storage path", path),
        ));
    }
    Ok(candidate.to_path_buf())
}

fn validate_release_id(release_id: &str) -> OtaResult<()> {
    if release_id.is_empty()
        || release_id.contains(['/', '\\'])
        || release_id == "."
        || release_id == ".."
    {
        return Err(OtaError::validation(
            "release_id",
            format!("'{}' cannot be used as a storage key", release_id),
        ));
    }
    Ok(())
}

/// Stores binaries on the local filesystem under `<root>/<release_id>/firmware.bin`
#[derive(Debug, Clone)]
pub struct LocalStorageBackend {
    root: PathBuf,
    public_base_url: Option<String>,
    url_secret: String,
}

impl LocalStorageBackend {
    /// Create a backend rooted at `root`; URLs are `file://` until a public base URL is set
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
            url_secret: String::new(),
        }
    }

    /// Serve downloads through `base_url`, authenticated with `secret`
    pub fn with_public_url(mut self, base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self.url_secret = secret.into();
        self
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an opaque path to a file below the root
    pub fn resolve(&self, path: &str) -> OtaResult<PathBuf> {
        Ok(self.root.join(validate_relative_path(path)?))
    }

    /// Check a signed download request against this backend's secret
    pub fn verify_download(&self, path: &str, expires_at: i64, token: &str) -> bool {
        !self.url_secret.is_empty()
            && verify_download_token(&self.url_secret, path, expires_at, token, chrono::Utc::now())
    }
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn store_binary(&self, release_id: &str, data: &[u8]) -> OtaResult<String> {
        validate_release_id(release_id)?;

        let dir = self.root.join(release_id);
        async_fs::create_dir_all(&dir).await?;

        let final_path = dir.join(BINARY_FILE_NAME);
        let temp_path = final_path.with_extension("tmp");
        async_fs::write(&temp_path, data).await?;
        async_fs::rename(&temp_path, &final_path).await?;

        let relative = format!("{}/{}", release_id, BINARY_FILE_NAME);
        debug!(path = %relative, size = data.len(), "Stored firmware binary");
        Ok(relative)
    }

    async fn get_binary(&self, path: &str) -> OtaResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        match async_fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OtaError::not_found(EntityKind::Binary, path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_binary_url(&self, path: &str, expiry: Duration) -> OtaResult<String> {
        let full_path = self.resolve(path)?;
        if async_fs::metadata(&full_path).await.is_err() {
            return Err(OtaError::not_found(EntityKind::Binary, path));
        }

        match &self.public_base_url {
            Some(base) => {
                let expires_at = expiry_timestamp(expiry);
                let token = download_token(&self.url_secret, path, expires_at)?;
                Ok(format!(
                    "{}/binaries/{}?expires={}&token={}",
                    base, path, expires_at, token
                ))
            }
            None => {
                let absolute = match async_fs::canonicalize(&full_path).await {
                    Ok(p) => p,
                    Err(_) => full_path,
                };
                Ok(format!("file://{}", absolute.display()))
            }
        }
    }

    async fn delete_binary(&self, path: &str) -> OtaResult<()> {
        let full_path = self.resolve(path)?;
        match async_fs::remove_file(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = full_path.parent()
            && parent != self.root
        {
            // Only succeeds when the release directory is empty
            if let Err(e) = async_fs::remove_dir(parent).await {
                debug!(dir = %parent.display(), error = %e, "Release directory kept");
            }
        }

        debug!(path = %path, "Deleted firmware binary");
        Ok(())
    }
}

/// Keeps binaries in memory; URLs use the `memory://` scheme
#[derive(Debug, Default)]
pub struct MemoryStorageBackend {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bytes stored at `path`
    pub async fn overwrite(&self, path: &str, data: Vec<u8>) {
        self.blobs.write().await.insert(path.to_string(), data);
    }

    /// Whether a binary is stored at `path`
    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    /// Number of stored binaries
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn store_binary(&self, release_id: &str, data: &[u8]) -> OtaResult<String> {
        validate_release_id(release_id)?;
        let path = format!("{}/{}", release_id, BINARY_FILE_NAME);
        self.blobs.write().await.insert(path.clone(), data.to_vec());
        Ok(path)
    }

    async fn get_binary(&self, path: &str) -> OtaResult<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| OtaError::not_found(EntityKind::Binary, path))
    }

    async fn get_binary_url(&self, path: &str, expiry: Duration) -> OtaResult<String> {
        if !self.blobs.read().await.contains_key(path) {
            return Err(OtaError::not_found(EntityKind::Binary, path));
        }
        Ok(format!(
            "memory://{}?expires={}",
            path,
            expiry_timestamp(expiry)
        ))
    }

    async fn delete_binary(&self, path: &str) -> OtaResult<()> {
        self.blobs.write().await.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_store_and_read() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let backend = LocalStorageBackend::new(temp_dir.path());

        let path = backend.store_binary("rel-1", b"image").await?;
        assert_eq!(path, "rel-1/firmware.bin");
        assert!(temp_dir.path().join("rel-1").join("firmware.bin").exists());
        assert_eq!(backend.get_binary(&path).await?, b"image");

        let url = backend.get_binary_url(&path, Duration::from_secs(60)).await?;
        assert!(url.starts_with("file://"));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_delete_removes_empty_dir() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let backend = LocalStorageBackend::new(temp_dir.path());

        let path = backend.store_binary("rel-1", b"image").await?;
        backend.delete_binary(&path).await?;
        assert!(!temp_dir.path().join("rel-1").exists());

        // second delete is a no-op
        backend.delete_binary(&path).await?;

        let missing = backend.get_binary(&path).await;
        assert!(matches!(missing, Err(ref e) if e.is_not_found(EntityKind::Binary)));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_rejects_traversal() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let backend = LocalStorageBackend::new(temp_dir.path());

        assert!(backend.get_binary("../etc/passwd").await.is_err());
        assert!(backend.get_binary("/etc/passwd").await.is_err());
        assert!(backend.store_binary("../escape", b"x").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_signed_public_url() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let backend = LocalStorageBackend::new(temp_dir.path())
            .with_public_url("https://ota.example.com/api/v1/ota/", "s3cret");

        let path = backend.store_binary("rel-1", b"image").await?;
        let url = backend.get_binary_url(&path, Duration::from_secs(600)).await?;
        assert!(url.starts_with("https://ota.example.com/api/v1/ota/binaries/rel-1/firmware.bin?"));

        let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
        let mut expires = 0i64;
        let mut token = "";
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse()?,
                Some(("token", v)) => token = v,
                _ => {}
            }
        }

        assert!(backend.verify_download(&path, expires, token));
        assert!(!backend.verify_download("rel-2/firmware.bin", expires, token));
        assert!(!backend.verify_download(&path, expires + 1, token));
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> OtaResult<()> {
        let now = chrono::Utc::now();
        let expires = now.timestamp() - 1;
        let token = download_token("k", "r/firmware.bin", expires)?;
        assert!(!verify_download_token("k", "r/firmware.bin", expires, &token, now));
        Ok(())
    }

    #[test]
    fn test_token_is_keyed_by_secret() -> OtaResult<()> {
        let now = chrono::Utc::now();
        let expires = now.timestamp() + 600;
        let token = download_token("k", "r/firmware.bin", expires)?;
        assert!(verify_download_token("k", "r/firmware.bin", expires, &token, now));
        assert!(!verify_download_token("other", "r/firmware.bin", expires, &token, now));

        // a plain digest of the inputs does not pass without the key
        let unkeyed = fleet_ota_crypto::utils::compute_sha256_hex(
            format!("k:r/firmware.bin:{}", expires).as_bytes(),
        );
        assert!(!verify_download_token("k", "r/firmware.bin", expires, &unkeyed, now));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, OtaError>(())
        };
        let result = with_timeout(Duration::from_secs(1), "get_binary", slow).await;
        assert!(matches!(
            result,
            Err(OtaError::StorageTimeout {
                operation: "get_binary",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_memory_backend() -> OtaResult<()> {
        let backend = MemoryStorageBackend::new();
        let path = backend.store_binary("rel-1", b"abc").await?;
        assert!(backend.contains(&path).await);

        let url = backend.get_binary_url(&path, Duration::from_secs(5)).await?;
        assert!(url.starts_with("memory://rel-1/firmware.bin?expires="));

        backend.overwrite(&path, b"abd".to_vec()).await;
        assert_eq!(backend.get_binary(&path).await?, b"abd");

        backend.delete_binary(&path).await?;
        assert!(backend.is_empty().await);
        Ok(())
    }
}
