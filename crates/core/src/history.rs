//! Execution history: the operator-visible record of one logical run.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{AppId, HistoryId};
use crate::ticket::{RunType, TimeWindow};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryStatus {
    Running,
    Processing,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl HistoryStatus {
    /// Running and Processing rows belong to a run that has not finished yet.
    pub fn is_active(&self) -> bool {
        matches!(self, HistoryStatus::Running | HistoryStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Running => "Running",
            HistoryStatus::Processing => "Processing",
            HistoryStatus::Success => "Success",
            HistoryStatus::Failed => "Failed",
            HistoryStatus::Cancelled => "Cancelled",
            HistoryStatus::Skipped => "Skipped",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "Running" => Ok(HistoryStatus::Running),
            "Processing" => Ok(HistoryStatus::Processing),
            "Success" => Ok(HistoryStatus::Success),
            "Failed" => Ok(HistoryStatus::Failed),
            "Cancelled" => Ok(HistoryStatus::Cancelled),
            "Skipped" => Ok(HistoryStatus::Skipped),
            other => Err(DomainError::validation(format!("unknown history status: {other}"))),
        }
    }
}

/// One logical run, shared by every physical attempt of that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub id: HistoryId,
    pub app_id: AppId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub total_events: u64,
    /// Append-only, newline separated.
    pub log: String,
    pub run_type: RunType,
    /// Window this run targeted; absent for skipped cycles and runs that
    /// failed before resolving one.
    pub window: Option<TimeWindow>,
}

impl ExecutionHistory {
    pub fn from_new(new: NewHistory) -> Self {
        let end_time = if new.status.is_active() {
            None
        } else {
            Some(new.start_time)
        };

        Self {
            id: HistoryId::new(),
            app_id: new.app_id,
            start_time: new.start_time,
            end_time,
            status: new.status,
            total_events: 0,
            log: new.log,
            run_type: new.run_type,
            window: new.window,
        }
    }

    pub fn append_log(&mut self, entry: &str) {
        self.log.push_str(entry);
    }

    /// Close the run. Only active rows can be finalized.
    pub fn finalize(
        &mut self,
        status: HistoryStatus,
        total_events: u64,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.status.is_active() {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                status.as_str(),
            ));
        }
        self.status = status;
        self.total_events = total_events;
        self.end_time = Some(at);
        Ok(())
    }
}

/// Request to create a history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistory {
    pub app_id: AppId,
    pub run_type: RunType,
    pub status: HistoryStatus,
    pub start_time: DateTime<Utc>,
    pub window: Option<TimeWindow>,
    pub log: String,
}

impl NewHistory {
    /// A run that is about to start fetching.
    pub fn processing(
        app_id: AppId,
        run_type: RunType,
        window: TimeWindow,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            app_id,
            run_type,
            status: HistoryStatus::Processing,
            start_time,
            window: Some(window),
            log: String::new(),
        }
    }

    /// A run that failed before it could fetch anything.
    pub fn failed(
        app_id: AppId,
        run_type: RunType,
        start_time: DateTime<Utc>,
        log: impl Into<String>,
    ) -> Self {
        Self {
            app_id,
            run_type,
            status: HistoryStatus::Failed,
            start_time,
            window: None,
            log: log.into(),
        }
    }

    /// A scheduled cycle that was not executed.
    pub fn skipped(app_id: AppId, start_time: DateTime<Utc>, log: impl Into<String>) -> Self {
        Self {
            app_id,
            run_type: RunType::Schedule,
            status: HistoryStatus::Skipped,
            start_time,
            window: None,
            log: log.into(),
        }
    }
}

/// Render one log line the way it is stored: `\n[HH:MM:SS] line`.
pub fn format_log_entry(at: NaiveTime, line: &str) -> String {
    format!("\n[{}] {}", at.format("%H:%M:%S"), line)
}
