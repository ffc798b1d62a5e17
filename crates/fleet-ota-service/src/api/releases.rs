//! Release routes

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use fleet_ota_rollout::{CreateReleaseRequest, ErrorKind, ReleaseChannel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{ApiError, AppState};

/// Query for `GET /releases`
#[derive(Debug, Deserialize)]
pub struct ListReleasesQuery {
    /// Device template
    pub template_id: Option<String>,
    /// Channel name
    pub channel: Option<String>,
}

/// Result of `POST /releases/{id}/verify`
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Release that was checked
    pub release_id: String,
    /// Whether hash and signature both check out
    pub verified: bool,
    /// Why verification failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /releases` with a multipart form
#[instrument(skip(state, multipart))]
pub async fn create_release(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut request = CreateReleaseRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "binary" => request.binary = field.bytes().await?.to_vec(),
            "template_id" => request.template_id = field.text().await?,
            "version" => request.version = field.text().await?,
            "channel" => request.channel = field.text().await?,
            "release_notes" => request.release_notes = field.text().await?,
            "created_by" => request.created_by = field.text().await?,
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    let release = state.service.releases().create_release(request).await?;
    state.metrics.releases_created_total.inc();

    Ok((StatusCode::CREATED, Json(release)))
}

/// `GET /releases?template_id=&channel=`
#[instrument(skip(state))]
pub async fn list_releases(
    State(state): State<AppState>,
    Query(params): Query<ListReleasesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(template_id), Some(channel)) = (params.template_id, params.channel) else {
        return Err(ApiError::BadRequest(
            "template_id and channel query parameters are required".to_string(),
        ));
    };
    let channel: ReleaseChannel = channel.parse()?;

    let releases = state
        .service
        .releases()
        .list_releases(&template_id, channel)
        .await?;
    Ok(Json(releases))
}

/// `GET /releases/{release_id}`
#[instrument(skip(state))]
pub async fn get_release(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let release = state.service.releases().get_release(&release_id).await?;
    Ok(Json(release))
}

/// `DELETE /releases/{release_id}`
#[instrument(skip(state))]
pub async fn delete_release(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.releases().delete_release(&release_id).await?;
    Ok(Json(json!({ "message": "release deleted" })))
}

/// `POST /releases/{release_id}/verify`
///
/// Integrity failures are a verification result, not a request error.
#[instrument(skip(state))]
pub async fn verify_release(
    State(state): State<AppState>,
    Path(release_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = match state.service.releases().verify_release(&release_id).await {
        Ok(()) => VerifyResponse {
            release_id,
            verified: true,
            error: None,
        },
        Err(e) if e.kind() == ErrorKind::Integrity => VerifyResponse {
            release_id,
            verified: false,
            error: Some(e.to_string()),
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}
