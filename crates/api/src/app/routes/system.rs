use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::services::IngestServices;

pub async fn health(Extension(services): Extension<Arc<IngestServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "busy_apps": services.locks.busy_count(),
    }))
}
