use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use playpulse_infra::jobs::TriggerError;
use playpulse_infra::store::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Domain(e) => json_error(StatusCode::CONFLICT, "invalid_state", e.to_string()),
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure while serving request");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn trigger_error_to_response(err: TriggerError) -> axum::response::Response {
    match err {
        TriggerError::AppNotFound(_) | TriggerError::HistoryNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        TriggerError::Unsupported(_)
        | TriggerError::MissingRetryTarget
        | TriggerError::NoRecordedWindow(_)
        | TriggerError::ForeignHistory { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
        }
        TriggerError::Domain(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        TriggerError::Store(e) => store_error_to_response(e),
    }
}

/// Parse a path identifier or answer 400.
pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{what}: {e}")))
}
