//! Executor: runs one ticket's logical run to a terminal state.
//!
//! ## Fetch state machine
//!
//! Each attempt calls the provider export endpoint and classifies the answer:
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 200 | import batch, aggregate sessions, succeed |
//! | 202 | export not ready; wait `poll_interval`, try again |
//! | 400, 401, 403 | fatal, no retry |
//! | 429 | fatal for this run, provider message kept verbatim |
//! | other / transport error | transient; wait `backoff`, try again |
//!
//! 202 and transient answers consume an attempt; after `max_attempts` the run
//! fails with "max retries exceeded". The cancellation token is checked before
//! every attempt and interrupts every wait.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use playpulse_core::{
    format_log_entry, AppConfig, HistoryStatus, JobTicket, NewHistory, RawEvent, RunType,
    TicketStatus, TimeWindow,
};
use playpulse_sessions::Transformer;

use super::cancel::{cancellable_sleep, CancellationRegistry, WaitOutcome};
use super::locks::AppLock;
use super::run::LogicalRun;
use crate::config::IngestConfig;
use crate::provider::{
    ExportRequest, ProviderError, ProviderResponse, SharedProvider, EXPORT_FIELDS, EXPORT_LIMIT,
};
use crate::store::{SharedStore, StoreError};

const NOT_READY_MESSAGE: &str = "waiting for provider (202)";

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("provider rejected request (400): {0}")]
    BadRequest(String),
    #[error("provider authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    /// Provider quota message, kept verbatim.
    #[error("{0}")]
    RateLimited(String),
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
    #[error("invalid export payload: {0}")]
    InvalidPayload(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for RunFailure {
    fn from(e: StoreError) -> Self {
        RunFailure::Storage(e.to_string())
    }
}

/// Classified answer to one export attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ready(Vec<RawEvent>),
    NotReady,
    Transient(String),
    Fatal(RunFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { total_events: u64, sessions: u64 },
    Failed(RunFailure),
    Cancelled,
}

impl RunOutcome {
    pub fn history_status(&self) -> HistoryStatus {
        match self {
            RunOutcome::Succeeded { .. } => HistoryStatus::Success,
            RunOutcome::Failed(_) => HistoryStatus::Failed,
            RunOutcome::Cancelled => HistoryStatus::Cancelled,
        }
    }

    pub fn ticket_status(&self) -> TicketStatus {
        match self {
            RunOutcome::Succeeded { .. } => TicketStatus::Completed,
            RunOutcome::Failed(_) => TicketStatus::Failed,
            RunOutcome::Cancelled => TicketStatus::Cancelled,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RunOutcome::Succeeded {
                total_events,
                sessions,
            } => format!("imported {total_events} events into {sessions} sessions"),
            RunOutcome::Failed(failure) => failure.to_string(),
            RunOutcome::Cancelled => "cancelled by operator".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ExportBody {
    data: Vec<RawEvent>,
}

/// Map one provider answer onto the state machine.
pub fn classify(response: Result<ProviderResponse, ProviderError>) -> FetchOutcome {
    let response = match response {
        Ok(r) => r,
        Err(e) => return FetchOutcome::Transient(e.to_string()),
    };

    match response.status {
        200 => match serde_json::from_str::<ExportBody>(&response.body) {
            Ok(body) => FetchOutcome::Ready(body.data),
            Err(e) => FetchOutcome::Fatal(RunFailure::InvalidPayload(e.to_string())),
        },
        202 => FetchOutcome::NotReady,
        400 => FetchOutcome::Fatal(RunFailure::BadRequest(response.body)),
        401 | 403 => FetchOutcome::Fatal(RunFailure::Auth {
            status: response.status,
            message: response.body,
        }),
        429 => FetchOutcome::Fatal(RunFailure::RateLimited(response.body)),
        status => FetchOutcome::Transient(format!("HTTP {status}: {}", response.body)),
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub backoff: Duration,
    /// Clock used for history log timestamps.
    pub local_offset: FixedOffset,
    pub export_fields: String,
    pub export_limit: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 18,
            poll_interval: Duration::from_secs(180),
            backoff: Duration::from_secs(10),
            local_offset: Utc.fix(),
            export_fields: EXPORT_FIELDS.to_string(),
            export_limit: EXPORT_LIMIT,
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval,
            backoff: config.backoff,
            local_offset: config.local_offset,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

pub struct Executor {
    store: SharedStore,
    provider: SharedProvider,
    cancellations: CancellationRegistry,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        store: SharedStore,
        provider: SharedProvider,
        cancellations: CancellationRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            cancellations,
            config,
        }
    }

    /// Run `ticket` to completion while holding `lock`.
    ///
    /// Never returns an error: every exit is written to the ticket and the
    /// history. The lock is released and the token discarded on return.
    pub async fn run(&self, ticket: JobTicket, lock: AppLock) -> RunOutcome {
        debug_assert_eq!(lock.app_id(), ticket.app_id);

        let window = match self.resolve_window(&ticket).await {
            Ok(window) => window,
            Err(failure) => {
                let outcome = RunOutcome::Failed(failure);
                self.fail_without_history(&ticket, &outcome).await;
                return outcome;
            }
        };

        let run = match LogicalRun::open(
            self.store.clone(),
            &ticket,
            window,
            self.config.local_offset,
        )
        .await
        {
            Ok(run) => run,
            Err(e) => {
                let outcome = RunOutcome::Failed(e.into());
                self.fail_without_history(&ticket, &outcome).await;
                return outcome;
            }
        };

        let token = self.cancellations.register(run.history_id());
        info!(
            app_id = %ticket.app_id,
            ticket_id = %ticket.id,
            history_id = %run.history_id(),
            run_type = ticket.run_type.as_str(),
            window = %window,
            resumed = run.resumed(),
            "run started"
        );

        let outcome = self.execute(&ticket, window, &run, &token).await;
        self.finish(&ticket, &run, &outcome).await;

        self.cancellations.discard(run.history_id());
        drop(lock);
        outcome
    }

    /// Retry tickets re-read the window recorded by the history they retry.
    async fn resolve_window(&self, ticket: &JobTicket) -> Result<TimeWindow, RunFailure> {
        if ticket.run_type != RunType::Retry {
            return Ok(ticket.window());
        }

        let history_id = ticket.retry_of_history_id.ok_or_else(|| {
            RunFailure::Configuration("retry ticket does not reference a history".to_string())
        })?;

        self.store
            .find_history_window(ticket.app_id, history_id)
            .await?
            .ok_or_else(|| {
                RunFailure::Configuration(format!(
                    "history {history_id} has no recorded window for app {}",
                    ticket.app_id
                ))
            })
    }

    async fn execute(
        &self,
        ticket: &JobTicket,
        window: TimeWindow,
        run: &LogicalRun,
        token: &CancellationToken,
    ) -> RunOutcome {
        let app = match self.load_app(ticket).await {
            Ok(app) => app,
            Err(failure) => return RunOutcome::Failed(failure),
        };

        let mut request = ExportRequest::new(&app.provider_app_id, &app.api_token, window);
        request.fields = self.config.export_fields.clone();
        request.limit = self.config.export_limit;

        run.log(format!("fetching {} ({})", window, ticket.run_type.as_str()))
            .await;

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let response = tokio::select! {
                biased;
                _ = token.cancelled() => return RunOutcome::Cancelled,
                response = self.provider.export(&request) => response,
            };

            let wait = match classify(response) {
                FetchOutcome::Ready(events) => {
                    return self.import(ticket, run, events).await;
                }
                FetchOutcome::Fatal(failure) => {
                    warn!(
                        app_id = %ticket.app_id,
                        ticket_id = %ticket.id,
                        attempt,
                        error = %failure,
                        "fatal provider response"
                    );
                    return RunOutcome::Failed(failure);
                }
                FetchOutcome::NotReady => {
                    run.log(format!(
                        "export not ready (202), attempt {attempt}/{max_attempts}"
                    ))
                    .await;
                    self.note_retry(ticket, NOT_READY_MESSAGE.to_string()).await;
                    self.config.poll_interval
                }
                FetchOutcome::Transient(reason) => {
                    warn!(
                        app_id = %ticket.app_id,
                        ticket_id = %ticket.id,
                        attempt,
                        error = %reason,
                        "transient provider failure"
                    );
                    run.log(format!(
                        "attempt {attempt}/{max_attempts} failed: {reason}"
                    ))
                    .await;
                    self.note_retry(ticket, reason).await;
                    self.config.backoff
                }
            };

            if attempt == max_attempts {
                break;
            }
            if cancellable_sleep(token, wait).await == WaitOutcome::Cancelled {
                return RunOutcome::Cancelled;
            }
        }

        RunOutcome::Failed(RunFailure::MaxRetriesExceeded {
            attempts: max_attempts,
        })
    }

    async fn load_app(&self, ticket: &JobTicket) -> Result<AppConfig, RunFailure> {
        let app = self
            .store
            .get_app(ticket.app_id)
            .await?
            .ok_or_else(|| RunFailure::Configuration(format!("app {} not found", ticket.app_id)))?;
        app.validate_credentials()
            .map_err(|e| RunFailure::Configuration(e.to_string()))?;
        Ok(app)
    }

    /// Ticket stays `processing` with one more retry on the counter.
    async fn note_retry(&self, ticket: &JobTicket, message: String) {
        if let Err(e) = self
            .store
            .update_ticket_status(ticket.id, TicketStatus::Processing, Some(message), true)
            .await
        {
            warn!(ticket_id = %ticket.id, error = %e, "failed to record retry on ticket");
        }
    }

    async fn import(&self, ticket: &JobTicket, run: &LogicalRun, events: Vec<RawEvent>) -> RunOutcome {
        self.try_import(ticket, run, &events)
            .await
            .unwrap_or_else(RunOutcome::Failed)
    }

    async fn try_import(
        &self,
        ticket: &JobTicket,
        run: &LogicalRun,
        events: &[RawEvent],
    ) -> Result<RunOutcome, RunFailure> {
        let total_events = self
            .store
            .insert_raw_events_batch(ticket.app_id, events)
            .await?;
        run.log(format!("stored {total_events} raw events")).await;

        let costs = self.store.load_cost_table(ticket.app_id).await?;
        let vocabulary = self.store.load_event_vocabulary(ticket.app_id).await?;
        let sessions = Transformer::new(costs)
            .with_vocabulary(vocabulary)
            .transform(events);
        let sessions = self
            .store
            .upsert_session_aggregates(ticket.app_id, run.history_id(), &sessions)
            .await?;
        run.log(format!("aggregated {sessions} sessions")).await;

        Ok(RunOutcome::Succeeded {
            total_events,
            sessions,
        })
    }

    async fn finish(&self, ticket: &JobTicket, run: &LogicalRun, outcome: &RunOutcome) {
        let message = outcome.message();
        run.log(&message).await;

        match outcome {
            RunOutcome::Succeeded { total_events, .. } => info!(
                app_id = %ticket.app_id,
                ticket_id = %ticket.id,
                history_id = %run.history_id(),
                total_events,
                "run succeeded"
            ),
            RunOutcome::Failed(failure) => error!(
                app_id = %ticket.app_id,
                ticket_id = %ticket.id,
                history_id = %run.history_id(),
                error = %failure,
                "run failed"
            ),
            RunOutcome::Cancelled => info!(
                app_id = %ticket.app_id,
                ticket_id = %ticket.id,
                history_id = %run.history_id(),
                "run cancelled"
            ),
        }

        let total_events = match outcome {
            RunOutcome::Succeeded { total_events, .. } => *total_events,
            _ => 0,
        };
        if let Err(e) = run.finalize(outcome.history_status(), total_events).await {
            error!(history_id = %run.history_id(), error = %e, "failed to finalize history");
        }
        self.close_ticket(ticket, outcome.ticket_status(), message).await;
    }

    /// Failure before a logical run was opened: record it in a closed
    /// `Failed` history, then close the ticket.
    async fn fail_without_history(&self, ticket: &JobTicket, outcome: &RunOutcome) {
        let message = outcome.message();
        error!(
            app_id = %ticket.app_id,
            ticket_id = %ticket.id,
            error = %message,
            "run could not start"
        );

        let now = Utc::now();
        let log = format_log_entry(
            now.with_timezone(&self.config.local_offset).time(),
            &message,
        );
        if let Err(e) = self
            .store
            .create_history(NewHistory::failed(ticket.app_id, ticket.run_type, now, log))
            .await
        {
            error!(ticket_id = %ticket.id, error = %e, "failed to record failed run");
        }
        self.close_ticket(ticket, outcome.ticket_status(), message).await;
    }

    async fn close_ticket(&self, ticket: &JobTicket, status: TicketStatus, message: String) {
        if let Err(e) = self
            .store
            .update_ticket_status(ticket.id, status, Some(message), false)
            .await
        {
            error!(ticket_id = %ticket.id, error = %e, "failed to close ticket");
        }
    }
}
