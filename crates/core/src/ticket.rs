//! Job tickets: durable records of one desired fetch window.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{AppId, HistoryId, TicketId};

/// Wire format the provider expects for `date_since` / `date_until`.
pub const PROVIDER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A wall-clock instant expressed in the provider's clock, second precision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderTimestamp(NaiveDateTime);

impl ProviderTimestamp {
    /// Truncates sub-second precision; the provider API only accepts seconds.
    pub fn new(at: NaiveDateTime) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        NaiveDateTime::parse_from_str(s, PROVIDER_TIME_FORMAT)
            .map(Self::new)
            .map_err(|e| DomainError::validation(format!("provider timestamp {s:?}: {e}")))
    }
}

impl core::fmt::Display for ProviderTimestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.format(PROVIDER_TIME_FORMAT))
    }
}

/// Half-open export window `[since, until)` in the provider clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: ProviderTimestamp,
    pub until: ProviderTimestamp,
}

impl TimeWindow {
    pub fn new(since: ProviderTimestamp, until: ProviderTimestamp) -> DomainResult<Self> {
        if since >= until {
            return Err(DomainError::validation(format!(
                "empty export window: {since} -> {until}"
            )));
        }
        Ok(Self { since, until })
    }
}

impl core::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.since, self.until)
    }
}

/// What created a ticket (and therefore how its window is derived).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Schedule,
    Manual,
    Demo,
    Retry,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Schedule => "schedule",
            RunType::Manual => "manual",
            RunType::Demo => "demo",
            RunType::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "schedule" => Ok(RunType::Schedule),
            "manual" => Ok(RunType::Manual),
            "demo" => Ok(RunType::Demo),
            "retry" => Ok(RunType::Retry),
            other => Err(DomainError::validation(format!("unknown run type: {other}"))),
        }
    }
}

/// Ticket lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Queued, waiting for the dispatcher
    Pending,
    /// Owned by an executor
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Completed | TicketStatus::Failed | TicketStatus::Cancelled
        )
    }

    /// Pending and processing tickets still occupy their window.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Processing => "processing",
            TicketStatus::Completed => "completed",
            TicketStatus::Failed => "failed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "processing" => Ok(TicketStatus::Processing),
            "completed" => Ok(TicketStatus::Completed),
            "failed" => Ok(TicketStatus::Failed),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown ticket status: {other}"))),
        }
    }

    /// Validate a status change. Terminal statuses are final.
    ///
    /// `processing -> processing` is allowed (long-poll progress updates) and
    /// `processing -> pending` is allowed (recovery after a restart).
    pub fn transition_to(self, next: TicketStatus) -> DomainResult<TicketStatus> {
        use TicketStatus::*;

        let allowed = match (self, next) {
            (from, _) if from.is_terminal() => false,
            (Pending, Pending) => false,
            (Pending, _) => true,
            (Processing, _) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(DomainError::invalid_transition(self.as_str(), next.as_str()))
        }
    }
}

/// One desired fetch for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: TicketId,
    pub app_id: AppId,
    pub date_since: ProviderTimestamp,
    pub date_until: ProviderTimestamp,
    pub status: TicketStatus,
    pub retry_count: u32,
    pub run_type: RunType,
    pub retry_of_history_id: Option<HistoryId>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobTicket {
    /// Materialize a ticket request as a pending ticket.
    pub fn from_new(new: NewTicket) -> Self {
        Self {
            id: TicketId::new(),
            app_id: new.app_id,
            date_since: new.window.since,
            date_until: new.window.until,
            status: TicketStatus::Pending,
            retry_count: 0,
            run_type: new.run_type,
            retry_of_history_id: new.retry_of_history_id,
            message: new.message,
            created_at: new.created_at,
            updated_at: new.created_at,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            since: self.date_since,
            until: self.date_until,
        }
    }

    /// Apply a status change, enforcing terminal finality.
    pub fn apply_status(
        &mut self,
        status: TicketStatus,
        message: Option<String>,
        increment_retry: bool,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.status = self.status.transition_to(status)?;
        if message.is_some() {
            self.message = message;
        }
        if increment_retry {
            self.retry_count += 1;
        }
        self.updated_at = at;
        Ok(())
    }
}

/// Request to create a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub app_id: AppId,
    pub window: TimeWindow,
    pub run_type: RunType,
    pub retry_of_history_id: Option<HistoryId>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTicket {
    pub fn new(app_id: AppId, window: TimeWindow, run_type: RunType, created_at: DateTime<Utc>) -> Self {
        Self {
            app_id,
            window,
            run_type,
            retry_of_history_id: None,
            message: None,
            created_at,
        }
    }

    pub fn retry_of(mut self, history_id: HistoryId) -> Self {
        self.retry_of_history_id = Some(history_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
