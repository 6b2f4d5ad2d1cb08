use serde::{Deserialize, Serialize};

use playpulse_core::{ExecutionHistory, HistoryId, TicketId};

#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    /// `manual`, `demo` or `retry`.
    pub run_type: String,
    #[serde(default)]
    pub retry_of_history_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerRunResponse {
    pub ticket_id: TicketId,
    pub run_type: String,
}

#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub history_id: HistoryId,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: HistoryId,
    pub app_id: String,
    pub run_type: &'static str,
    pub status: &'static str,
    pub start_time: String,
    pub end_time: Option<String>,
    pub total_events: u64,
    pub date_since: Option<String>,
    pub date_until: Option<String>,
    pub log: String,
}

impl From<ExecutionHistory> for RunResponse {
    fn from(h: ExecutionHistory) -> Self {
        Self {
            id: h.id,
            app_id: h.app_id.to_string(),
            run_type: h.run_type.as_str(),
            status: h.status.as_str(),
            start_time: h.start_time.to_rfc3339(),
            end_time: h.end_time.map(|t| t.to_rfc3339()),
            total_events: h.total_events,
            date_since: h.window.map(|w| w.since.to_string()),
            date_until: h.window.map(|w| w.until.to_string()),
            log: h.log,
        }
    }
}
