//! Analytics provider export API.

use std::sync::Arc;

use playpulse_core::TimeWindow;

pub mod http;
pub mod scripted;

pub use http::HttpExportProvider;
pub use scripted::ScriptedProvider;

/// Columns requested from the export endpoint.
pub const EXPORT_FIELDS: &str = "event_name,event_timestamp,event_json";

/// Row cap sent with every export request.
pub const EXPORT_LIMIT: u64 = 1_000_000;

pub type SharedProvider = Arc<dyn ExportProvider>;

/// One export call.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub provider_app_id: String,
    pub api_token: String,
    pub window: TimeWindow,
    pub fields: String,
    pub limit: u64,
}

impl ExportRequest {
    pub fn new(
        provider_app_id: impl Into<String>,
        api_token: impl Into<String>,
        window: TimeWindow,
    ) -> Self {
        Self {
            provider_app_id: provider_app_id.into(),
            api_token: api_token.into(),
            window,
            fields: EXPORT_FIELDS.to_string(),
            limit: EXPORT_LIMIT,
        }
    }
}

impl std::fmt::Debug for ExportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRequest")
            .field("provider_app_id", &self.provider_app_id)
            .field("api_token", &"<redacted>")
            .field("window", &self.window)
            .field("fields", &self.fields)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Raw HTTP outcome; interpretation belongs to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
}

impl ProviderResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to build request: {0}")]
    Request(String),
}

#[async_trait::async_trait]
pub trait ExportProvider: Send + Sync {
    async fn export(&self, request: &ExportRequest) -> Result<ProviderResponse, ProviderError>;
}
