//! `reqwest` client for the provider Logs API.

use std::time::Duration;

use tracing::debug;

use super::{ExportProvider, ExportRequest, ProviderError, ProviderResponse};

const EXPORT_PATH: &str = "/logs/v1/export/events.json";

#[derive(Debug, Clone)]
pub struct HttpExportProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExportProvider {
    /// `timeout` bounds the whole request; exports can take minutes.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn export_url(&self) -> String {
        format!("{}{}", self.base_url, EXPORT_PATH)
    }
}

#[async_trait::async_trait]
impl ExportProvider for HttpExportProvider {
    async fn export(&self, request: &ExportRequest) -> Result<ProviderResponse, ProviderError> {
        let since = request.window.since.to_string();
        let until = request.window.until.to_string();
        let limit = request.limit.to_string();

        debug!(
            provider_app_id = %request.provider_app_id,
            window = %request.window,
            "requesting provider export"
        );

        let response = self
            .client
            .get(self.export_url())
            .header(reqwest::header::AUTHORIZATION, format!("OAuth {}", request.api_token))
            .query(&[
                ("application_id", request.provider_app_id.as_str()),
                ("date_since", since.as_str()),
                ("date_until", until.as_str()),
                ("fields", request.fields.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(ProviderResponse { status, body })
    }
}
