//! Daemon lifecycle: wiring, HTTP serving and shutdown

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_ota_crypto::{Ed25519FirmwareSigner, FirmwareSigner};
use fleet_ota_rollout::{InMemoryDeviceRegistry, LocalStorageBackend, OtaService};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::config::ServiceConfig;
use crate::observability::ApiMetrics;

/// Owns the configuration and runs one service instance
pub struct OtaDaemon {
    config: ServiceConfig,
}

impl OtaDaemon {
    /// Create a daemon from validated configuration
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Daemon configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Wire storage, signer, registry and the rollout core into handler state
    pub async fn build_state(&self) -> Result<AppState> {
        let storage_config = &self.config.storage;

        tokio::fs::create_dir_all(&storage_config.root_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create storage directory: {}",
                    storage_config.root_dir.display()
                )
            })?;

        let mut storage = LocalStorageBackend::new(&storage_config.root_dir);
        if let (Some(base), Some(secret)) =
            (&storage_config.public_base_url, &storage_config.url_secret)
        {
            storage = storage.with_public_url(base, secret);
            info!("Serving signed download URLs under {}", base);
        }
        let storage = Arc::new(storage);

        let key_path = self.config.signing.key_path.clone();
        let signer = tokio::task::spawn_blocking(move || {
            Ed25519FirmwareSigner::load_or_generate(&key_path)
        })
        .await
        .context("Signing key task panicked")?
        .with_context(|| {
            format!(
                "Failed to load signing key: {}",
                self.config.signing.key_path.display()
            )
        })?;
        info!(fingerprint = %signer.key_fingerprint(), "Release signing enabled");

        let registry = match &self.config.fleet.devices_file {
            Some(path) => InMemoryDeviceRegistry::load_from_path(path)
                .await
                .with_context(|| format!("Failed to load devices file: {}", path.display()))?,
            None => {
                warn!("No devices file configured, device registry is empty");
                InMemoryDeviceRegistry::new()
            }
        };

        let service = OtaService::builder()
            .storage(storage.clone())
            .registry(Arc::new(registry))
            .signer(Arc::new(signer))
            .config(self.config.rollout.clone())
            .build()
            .context("Failed to build OTA service")?;

        let metrics = ApiMetrics::new().context("Failed to create metrics registry")?;

        Ok(AppState::new(Arc::new(service), Arc::new(metrics))
            .with_binaries(storage)
            .with_max_upload_bytes(self.config.server.max_upload_bytes)
            .with_metrics_enabled(self.config.observability.enable_metrics))
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.build_state().await?;
        let app = api::router(state);

        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| {
                format!("Failed to bind {}", self.config.server.bind_address)
            })?;
        info!(
            "OTA service listening on {}",
            listener
                .local_addr()
                .context("Listener has no local address")?
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server error")?;

        info!("OTA service stopped");
        Ok(())
    }
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C elsewhere)
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
            // Without a signal source the server runs until killed
            std::future::pending::<()>().await;
        }
    }
}
