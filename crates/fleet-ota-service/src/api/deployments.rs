//! Deployment routes

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_ota_rollout::{DeploymentConfig, UpdateStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{ApiError, AppState};

const DEFAULT_PENDING_LIMIT: usize = 100;

/// Body of `POST /deployments`
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Release to deploy
    pub release_id: String,
    /// Strategy, percentage, threshold and optional explicit targets
    pub config: DeploymentConfig,
}

/// Query for `GET /deployments/{id}`
#[derive(Debug, Default, Deserialize)]
pub struct GetDeploymentQuery {
    /// Return the progress report instead of the raw record
    #[serde(default)]
    pub status: bool,
}

/// Query for `GET /deployments`
#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Release whose deployments to list
    pub release_id: Option<String>,
}

/// Query for `GET /deployments/{id}/devices`
#[derive(Debug, Deserialize)]
pub struct DeviceUpdatesQuery {
    /// Only records in this status
    pub status: Option<String>,
}

/// Query for `GET /deployments/{id}/devices/pending`
#[derive(Debug, Deserialize)]
pub struct PendingDevicesQuery {
    /// Maximum number of devices returned
    pub limit: Option<usize>,
}

/// `POST /deployments`
#[instrument(skip(state, payload))]
pub async fn create_deployment(
    State(state): State<AppState>,
    payload: Result<Json<CreateDeploymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let deployment = state
        .service
        .planner()
        .deploy_release(&request.release_id, request.config)
        .await?;
    state.metrics.deployments_created_total.inc();

    Ok((StatusCode::CREATED, Json(deployment)))
}

/// `GET /deployments/{deployment_id}`, or its progress report with `?status=true`
#[instrument(skip(state))]
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
    Query(params): Query<GetDeploymentQuery>,
) -> Result<Response, ApiError> {
    if params.status {
        let report = state
            .service
            .controller()
            .get_deployment_status(&deployment_id)
            .await?;
        return Ok(Json(report).into_response());
    }

    let deployment = state.service.planner().get_deployment(&deployment_id).await?;
    Ok(Json(deployment).into_response())
}

/// `GET /deployments?release_id=`
#[instrument(skip(state))]
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(params): Query<ListDeploymentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(release_id) = params.release_id else {
        return Err(ApiError::BadRequest(
            "release_id query parameter is required".to_string(),
        ));
    };

    let deployments = state.service.planner().list_deployments(&release_id).await?;
    Ok(Json(deployments))
}

/// `GET /deployments/active`
#[instrument(skip(state))]
pub async fn active_deployments(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let deployments = state.service.planner().get_active_deployments().await?;
    Ok(Json(deployments))
}

/// `PUT /deployments/{deployment_id}/activate`
#[instrument(skip(state))]
pub async fn activate_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .service
        .controller()
        .activate_deployment(&deployment_id)
        .await?;
    Ok(Json(deployment))
}

/// `PUT /deployments/{deployment_id}/pause`
#[instrument(skip(state))]
pub async fn pause_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .service
        .planner()
        .pause_deployment(&deployment_id)
        .await?;
    Ok(Json(deployment))
}

/// `PUT /deployments/{deployment_id}/resume`
#[instrument(skip(state))]
pub async fn resume_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .service
        .planner()
        .resume_deployment(&deployment_id)
        .await?;
    Ok(Json(deployment))
}

/// `POST /deployments/{deployment_id}/rollback`
#[instrument(skip(state))]
pub async fn rollback_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let replacement = state
        .service
        .rollback()
        .rollback_deployment(&deployment_id)
        .await?;
    state.metrics.rollbacks_total.inc();

    info!(
        deployment_id = %deployment_id,
        replacement = %replacement.deployment_id,
        "Rollback requested by operator"
    );
    Ok((StatusCode::CREATED, Json(replacement)))
}

/// `GET /deployments/{deployment_id}/devices?status=`
#[instrument(skip(state))]
pub async fn list_device_updates(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
    Query(params): Query<DeviceUpdatesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // 404 for unknown deployments rather than an empty list
    state.service.planner().get_deployment(&deployment_id).await?;

    let tracker = state.service.tracker();
    let updates = match params.status {
        Some(status) => {
            let status: UpdateStatus = status.parse()?;
            tracker
                .get_device_updates_by_status(&deployment_id, status)
                .await?
        }
        None => tracker.list_device_updates(&deployment_id).await?,
    };
    Ok(Json(updates))
}

/// `GET /deployments/{deployment_id}/devices/pending?limit=`
#[instrument(skip(state))]
pub async fn pending_devices(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
    Query(params): Query<PendingDevicesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.planner().get_deployment(&deployment_id).await?;

    let devices = state
        .service
        .tracker()
        .get_devices_pending_update(
            &deployment_id,
            params.limit.unwrap_or(DEFAULT_PENDING_LIMIT),
        )
        .await?;
    Ok(Json(devices))
}
