use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use playpulse_core::{AppId, HistoryId, RunType};

use crate::app::dto::{CancelRunResponse, RunResponse, TriggerRunRequest, TriggerRunResponse};
use crate::app::errors::{
    json_error, parse_id, store_error_to_response, trigger_error_to_response,
};
use crate::app::services::IngestServices;

pub async fn trigger_run(
    Extension(services): Extension<Arc<IngestServices>>,
    Path(app_id): Path<String>,
    Json(req): Json<TriggerRunRequest>,
) -> axum::response::Response {
    let app_id: AppId = match parse_id(&app_id, "app_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let run_type = match RunType::parse(req.run_type.trim()) {
        Ok(t) => t,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_run_type", e.to_string()),
    };
    let retry_of: Option<HistoryId> = match req.retry_of_history_id.as_deref() {
        Some(raw) => match parse_id(raw, "retry_of_history_id") {
            Ok(id) => Some(id),
            Err(resp) => return resp,
        },
        None => None,
    };

    match services.trigger.enqueue(app_id, run_type, retry_of).await {
        Ok(Some(ticket_id)) => (
            StatusCode::ACCEPTED,
            Json(TriggerRunResponse {
                ticket_id,
                run_type: run_type.as_str().to_string(),
            }),
        )
            .into_response(),
        Ok(None) => json_error(
            StatusCode::CONFLICT,
            "duplicate",
            "an open ticket already covers this window",
        ),
        Err(e) => trigger_error_to_response(e),
    }
}

pub async fn get_run(
    Extension(services): Extension<Arc<IngestServices>>,
    Path(history_id): Path<String>,
) -> axum::response::Response {
    let history_id: HistoryId = match parse_id(&history_id, "history_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.get_history(history_id).await {
        Ok(Some(history)) => Json(RunResponse::from(history)).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "run not found"),
        Err(e) => store_error_to_response(e),
    }
}

/// Signal cancellation; the executor finalizes the run at its next check.
pub async fn cancel_run(
    Extension(services): Extension<Arc<IngestServices>>,
    Path(history_id): Path<String>,
) -> axum::response::Response {
    let history_id: HistoryId = match parse_id(&history_id, "history_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if services.cancellations.signal_cancel(history_id) {
        tracing::info!(history_id = %history_id, "cancellation requested");
        return (
            StatusCode::ACCEPTED,
            Json(CancelRunResponse {
                history_id,
                status: "cancelling",
            }),
        )
            .into_response();
    }

    match services.store.get_history(history_id).await {
        Ok(Some(history)) => json_error(
            StatusCode::CONFLICT,
            "not_running",
            format!("run is {}", history.status.as_str()),
        ),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "run not found"),
        Err(e) => store_error_to_response(e),
    }
}
