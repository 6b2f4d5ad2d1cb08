//! `playpulse-core`: shared domain model for the ingestion pipeline.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, tenant app configuration, job tickets, execution history,
//! raw provider events and session aggregates.

pub mod app;
pub mod error;
pub mod event;
pub mod history;
pub mod id;
pub mod session;
pub mod ticket;

pub use app::AppConfig;
pub use error::{DomainError, DomainResult};
pub use event::RawEvent;
pub use history::{format_log_entry, ExecutionHistory, HistoryStatus, NewHistory};
pub use id::{AppId, HistoryId, TicketId};
pub use session::{SessionAggregate, SessionStatus};
pub use ticket::{
    JobTicket, NewTicket, ProviderTimestamp, RunType, TicketStatus, TimeWindow, PROVIDER_TIME_FORMAT,
};
