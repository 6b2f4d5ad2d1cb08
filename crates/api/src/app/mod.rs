//! Operator HTTP surface (Axum router + service wiring).
//!
//! - `services.rs`: store, provider and job runtime wiring
//! - `routes/`: handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, IngestServices};

/// Build the HTTP router (used by `main.rs` and the black-box tests).
pub fn build_app(services: Arc<IngestServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/apps/:app_id/runs", post(routes::runs::trigger_run))
        .route("/runs/:history_id", get(routes::runs::get_run))
        .route("/runs/:history_id/cancel", post(routes::runs::cancel_run))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
