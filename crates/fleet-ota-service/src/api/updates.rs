//! Device-facing routes

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use fleet_ota_rollout::UpdateStatusReport;
use serde_json::json;
use tracing::{debug, instrument};

use super::{ApiError, AppState};

/// `GET /updates/{device_id}`
///
/// Answers 404 with code `no_pending_update` when the device is up to date.
#[instrument(skip(state))]
pub async fn get_update(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let update = state
        .service
        .device_api()
        .get_update_for_device(&device_id)
        .await?;
    Ok(Json(update))
}

/// `POST /updates/status`
#[instrument(skip(state, payload))]
pub async fn report_status(
    State(state): State<AppState>,
    payload: Result<Json<UpdateStatusReport>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(report) = payload?;

    let outcome = state
        .service
        .device_api()
        .report_update_status(&report)
        .await?;

    state
        .metrics
        .status_reports_total
        .with_label_values(&[report.status.as_str()])
        .inc();
    if outcome.rollback.is_some() {
        state.metrics.rollbacks_total.inc();
    }
    if !outcome.applied {
        debug!(
            device_id = %report.device_id,
            status = %report.status,
            "Report did not change the update record"
        );
    }

    Ok(Json(json!({ "message": "status updated" })))
}
