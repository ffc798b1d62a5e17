//! Daemon configuration file
//!
//! The file is JSON. A missing file is replaced by the defaults on first
//! start, so a fresh install comes up with local storage, a generated signing
//! key and an empty device registry.

use anyhow::{Context, Result};
use fleet_ota_rollout::RolloutConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Schema tag written into every config file
pub const CONFIG_SCHEMA_VERSION: &str = "fleet-ota.config/1";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "FLEET_OTA_";

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Config schema version
    pub schema_version: String,
    /// HTTP listener
    pub server: ServerConfig,
    /// Firmware binary storage
    pub storage: StorageConfig,
    /// Release signing key
    pub signing: SigningConfig,
    /// Device registry source
    pub fleet: FleetConfig,
    /// Rollout behaviour
    pub rollout: RolloutConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub bind_address: String,
    /// Largest accepted request body, which bounds firmware uploads
    pub max_upload_bytes: usize,
}

/// Binary storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<release_id>/firmware.bin`
    pub root_dir: PathBuf,
    /// Externally reachable API base, e.g. `https://ota.example.com/api/v1/ota`.
    /// When unset devices receive `file://` URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    /// Secret used to sign download URLs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_secret: Option<String>,
}

/// Signing key settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Key file; generated on first start when missing
    pub key_path: PathBuf,
}

/// Device registry settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// JSON array of device records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<PathBuf>,
}

/// Logging and metrics settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Serve Prometheus metrics at `/api/v1/ota/metrics`
    pub enable_metrics: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            signing: SigningConfig::default(),
            fleet: FleetConfig::default(),
            rollout: RolloutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8006".to_string(),
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data/binaries"),
            public_base_url: None,
            url_secret: None,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("data/signing.key"),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "fleet_ota=info,info".to_string(),
            json_logs: false,
            enable_metrics: true,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path`, writing the defaults there if the file does not exist
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!("Config file not found at {}, creating default", path.display());
            let config = Self::default();
            config.save_to_path(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServiceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Apply `FLEET_OTA_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
        };

        if let Some(bind) = var("BIND_ADDRESS") {
            debug!("Overriding bind address from environment");
            self.server.bind_address = bind;
        }
        if let Some(dir) = var("STORAGE_DIR") {
            debug!("Overriding storage directory from environment");
            self.storage.root_dir = PathBuf::from(dir);
        }
        if let Some(filter) = var("LOG_FILTER") {
            self.observability.log_filter = filter;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.schema_version.starts_with("fleet-ota.config/") {
            anyhow::bail!("Invalid schema version: {}", self.schema_version);
        }

        if self.server.bind_address.trim().is_empty() {
            anyhow::bail!("Bind address must not be empty");
        }
        self.server
            .bind_address
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))?;

        if self.server.max_upload_bytes == 0 {
            anyhow::bail!("Maximum upload size must be greater than zero");
        }

        if self.storage.root_dir.as_os_str().is_empty() {
            anyhow::bail!("Storage root directory must not be empty");
        }

        if let Some(base) = &self.storage.public_base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                anyhow::bail!("Public base URL must be http(s): {}", base);
            }
            let has_secret = self
                .storage
                .url_secret
                .as_deref()
                .is_some_and(|secret| !secret.is_empty());
            if !has_secret {
                anyhow::bail!("A url_secret is required when public_base_url is set");
            }
        }

        if self.signing.key_path.as_os_str().is_empty() {
            anyhow::bail!("Signing key path must not be empty");
        }

        self.rollout
            .validate()
            .context("Invalid rollout configuration")?;

        if self.observability.log_filter.trim().is_empty() {
            anyhow::bail!("Log filter must not be empty");
        }

        Ok(())
    }
}
