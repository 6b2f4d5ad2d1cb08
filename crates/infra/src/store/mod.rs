//! Durable state for the ingestion pipeline.
//!
//! The pipeline talks to storage only through [`IngestStore`]. Two
//! implementations exist:
//!
//! - [`InMemoryIngestStore`] for tests and local development
//! - [`PostgresIngestStore`] for production (schema in `migrations/`)

use std::sync::Arc;

use chrono::{DateTime, Utc};

use playpulse_core::{
    AppConfig, AppId, DomainError, ExecutionHistory, HistoryId, HistoryStatus, JobTicket,
    NewHistory, NewTicket, RawEvent, SessionAggregate, TicketId, TicketStatus, TimeWindow,
};
use playpulse_sessions::{CostTable, EventVocabulary};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIngestStore;
pub use postgres::PostgresIngestStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store handle shared by the scheduler, dispatcher, executors and the API.
pub type SharedStore = Arc<dyn IngestStore>;

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// A state change the domain rules reject (e.g. touching a final ticket).
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// What startup recovery changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecoveryReport {
    pub tickets_requeued: u64,
    pub histories_failed: u64,
}

#[async_trait::async_trait]
pub trait IngestStore: Send + Sync {
    /// Insert a pending ticket.
    ///
    /// Returns `None` (and stores nothing) when a pending or processing ticket
    /// already exists for the same `(app_id, date_since)`.
    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<TicketId>>;

    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<JobTicket>>;

    /// Pending tickets, oldest first.
    async fn list_pending_tickets(&self) -> StoreResult<Vec<JobTicket>>;

    /// Change a ticket's status. Final tickets reject the change.
    async fn update_ticket_status(
        &self,
        id: TicketId,
        status: TicketStatus,
        message: Option<String>,
        increment_retry: bool,
    ) -> StoreResult<JobTicket>;

    /// Tickets of any status created at or after `since`.
    async fn count_tickets_created_since(
        &self,
        app_id: AppId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn create_history(&self, history: NewHistory) -> StoreResult<HistoryId>;

    async fn get_history(&self, id: HistoryId) -> StoreResult<Option<ExecutionHistory>>;

    /// The app's Running/Processing history, if any.
    async fn find_active_history(&self, app_id: AppId) -> StoreResult<Option<ExecutionHistory>>;

    /// The window a history of `app_id` recorded when it was opened.
    ///
    /// `None` when the history is missing, has no window or belongs to
    /// another app.
    async fn find_history_window(
        &self,
        app_id: AppId,
        id: HistoryId,
    ) -> StoreResult<Option<TimeWindow>>;

    /// Append a pre-formatted entry to the history log.
    async fn append_history_log(&self, id: HistoryId, entry: &str) -> StoreResult<()>;

    async fn finalize_history(
        &self,
        id: HistoryId,
        status: HistoryStatus,
        total_events: u64,
    ) -> StoreResult<()>;

    /// Persist one export batch. Returns the number of rows written.
    async fn insert_raw_events_batch(&self, app_id: AppId, rows: &[RawEvent]) -> StoreResult<u64>;

    /// Store one run's aggregates, keyed by `(app_id, history_id, session_id)`.
    ///
    /// Rows of other runs are never touched; writing the same run again
    /// replaces that run's rows.
    async fn upsert_session_aggregates(
        &self,
        app_id: AppId,
        history_id: HistoryId,
        rows: &[SessionAggregate],
    ) -> StoreResult<u64>;

    async fn list_active_apps(&self) -> StoreResult<Vec<AppConfig>>;

    async fn get_app(&self, app_id: AppId) -> StoreResult<Option<AppConfig>>;

    /// Consumable unit costs configured for the app.
    async fn load_cost_table(&self, app_id: AppId) -> StoreResult<CostTable>;

    /// Start/win/fail event names configured for the app, defaults otherwise.
    async fn load_event_vocabulary(&self, app_id: AppId) -> StoreResult<EventVocabulary>;

    /// Requeue processing tickets and fail active histories left behind by a
    /// previous process. `log_entry` is appended to every failed history.
    async fn reset_interrupted(&self, log_entry: &str) -> StoreResult<RecoveryReport>;
}
