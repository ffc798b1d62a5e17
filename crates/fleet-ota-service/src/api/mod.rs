//! HTTP API served under `/api/v1/ota`
//!
//! Operator routes manage releases and deployments. Device routes hand out
//! pending updates, accept status reports and serve signed binary downloads.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use fleet_ota_rollout::{LocalStorageBackend, OtaService};

use crate::observability::{ApiMetrics, track_requests};

pub mod binaries;
pub mod deployments;
pub mod error;
pub mod health;
pub mod releases;
pub mod updates;

pub use error::{ApiError, ErrorBody};

/// Route prefix for every endpoint
pub const API_PREFIX: &str = "/api/v1/ota";

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Rollout core
    pub service: Arc<OtaService>,
    /// Metrics registry
    pub metrics: Arc<ApiMetrics>,
    /// Local backend serving signed downloads, when binaries live on this host
    pub binaries: Option<Arc<LocalStorageBackend>>,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
    /// Expose `/metrics`
    pub metrics_enabled: bool,
}

impl AppState {
    /// State without a download backend
    pub fn new(service: Arc<OtaService>, metrics: Arc<ApiMetrics>) -> Self {
        Self {
            service,
            metrics,
            binaries: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            metrics_enabled: true,
        }
    }

    /// Serve signed downloads from `backend`
    pub fn with_binaries(mut self, backend: Arc<LocalStorageBackend>) -> Self {
        self.binaries = Some(backend);
        self
    }

    /// Limit request bodies to `bytes`
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Enable or disable the metrics endpoint
    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

/// Build the full router
pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/health", get(health::health))
        .route(
            "/releases",
            post(releases::create_release).get(releases::list_releases),
        )
        .route(
            "/releases/{release_id}",
            get(releases::get_release).delete(releases::delete_release),
        )
        .route("/releases/{release_id}/verify", post(releases::verify_release))
        .route(
            "/deployments",
            post(deployments::create_deployment).get(deployments::list_deployments),
        )
        .route("/deployments/active", get(deployments::active_deployments))
        .route("/deployments/{deployment_id}", get(deployments::get_deployment))
        .route(
            "/deployments/{deployment_id}/activate",
            put(deployments::activate_deployment),
        )
        .route(
            "/deployments/{deployment_id}/pause",
            put(deployments::pause_deployment),
        )
        .route(
            "/deployments/{deployment_id}/resume",
            put(deployments::resume_deployment),
        )
        .route(
            "/deployments/{deployment_id}/rollback",
            post(deployments::rollback_deployment),
        )
        .route(
            "/deployments/{deployment_id}/devices",
            get(deployments::list_device_updates),
        )
        .route(
            "/deployments/{deployment_id}/devices/pending",
            get(deployments::pending_devices),
        )
        .route("/updates/status", post(updates::report_status))
        .route("/updates/{device_id}", get(updates::get_update))
        .route(
            "/binaries/{release_id}/{file}",
            get(binaries::download_binary),
        );

    if state.metrics_enabled {
        api = api.route("/metrics", get(health::metrics));
    }

    let api = api
        .route_layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state);

    Router::new().nest(API_PREFIX, api)
}
