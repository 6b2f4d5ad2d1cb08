//! Provider double that replays a fixed sequence of responses.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::{ExportProvider, ExportRequest, ProviderError, ProviderResponse};

type Scripted = Result<ProviderResponse, ProviderError>;

/// Returns queued responses in order, then a transport error once exhausted.
/// Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ExportRequest>>,
}

impl ScriptedProvider {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Scripted>,
    {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for a script of HTTP responses.
    pub fn statuses<I, B>(responses: I) -> Self
    where
        I: IntoIterator<Item = (u16, B)>,
        B: Into<String>,
    {
        Self::new(
            responses
                .into_iter()
                .map(|(status, body)| Ok(ProviderResponse::new(status, body))),
        )
    }

    pub fn push(&self, response: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ExportRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait::async_trait]
impl ExportProvider for ScriptedProvider {
    async fn export(&self, request: &ExportRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".to_string())))
    }
}
