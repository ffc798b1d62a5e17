//! Signed firmware downloads

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use fleet_ota_rollout::StorageBackend;
use fleet_ota_rollout::storage::with_timeout;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::{ApiError, AppState};

/// Signature parameters appended to download URLs
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Unix timestamp after which the link is dead
    pub expires: i64,
    /// Hex token binding path and expiry
    pub token: String,
}

/// `GET /binaries/{release_id}/{file}?expires=&token=`
#[instrument(skip(state, params))]
pub async fn download_binary(
    State(state): State<AppState>,
    Path((release_id, file)): Path<(String, String)>,
    Query(params): Query<DownloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(storage) = state.binaries.as_ref() else {
        return Err(ApiError::Unavailable("binary downloads"));
    };

    let path = format!("{}/{}", release_id, file);
    if !storage.verify_download(&path, params.expires, &params.token) {
        warn!(path = %path, "Rejected download with invalid or expired token");
        return Err(ApiError::Forbidden);
    }

    let data = with_timeout(
        state.service.config().storage_timeout,
        "get_binary",
        storage.get_binary(&path),
    )
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file),
            ),
        ],
        data,
    ))
}
