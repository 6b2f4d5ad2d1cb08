//! Operator-requested runs.

use chrono::{DateTime, FixedOffset, TimeDelta, Timelike, Utc};
use tracing::info;

use playpulse_core::{
    AppId, DomainError, HistoryId, NewTicket, ProviderTimestamp, RunType, TicketId, TimeWindow,
};

use crate::store::{SharedStore, StoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TriggerError {
    #[error("app not found: {0}")]
    AppNotFound(AppId),
    #[error("{0} runs cannot be requested manually")]
    Unsupported(&'static str),
    #[error("retry requires retry_of_history_id")]
    MissingRetryTarget,
    #[error("history {0} not found")]
    HistoryNotFound(HistoryId),
    #[error("history {0} has no recorded window")]
    NoRecordedWindow(HistoryId),
    #[error("history {history_id} does not belong to app {app_id}")]
    ForeignHistory { history_id: HistoryId, app_id: AppId },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lookback of ad-hoc windows: `(delay, length)` in minutes.
fn adhoc_window(run_type: RunType) -> Option<(i64, i64)> {
    match run_type {
        RunType::Manual => Some((60, 30)),
        RunType::Demo => Some((45, 15)),
        RunType::Schedule | RunType::Retry => None,
    }
}

pub struct ManualTrigger {
    store: SharedStore,
    provider_offset: FixedOffset,
}

impl ManualTrigger {
    pub fn new(store: SharedStore, provider_offset: FixedOffset) -> Self {
        Self {
            store,
            provider_offset,
        }
    }

    /// Queue a manual, demo or retry run.
    ///
    /// Returns `None` when an open ticket already covers the same window start.
    pub async fn enqueue(
        &self,
        app_id: AppId,
        run_type: RunType,
        retry_of: Option<HistoryId>,
    ) -> Result<Option<TicketId>, TriggerError> {
        self.enqueue_at(app_id, run_type, retry_of, Utc::now()).await
    }

    pub async fn enqueue_at(
        &self,
        app_id: AppId,
        run_type: RunType,
        retry_of: Option<HistoryId>,
        now: DateTime<Utc>,
    ) -> Result<Option<TicketId>, TriggerError> {
        if self.store.get_app(app_id).await?.is_none() {
            return Err(TriggerError::AppNotFound(app_id));
        }

        let ticket = match run_type {
            RunType::Retry => {
                let history_id = retry_of.ok_or(TriggerError::MissingRetryTarget)?;
                let history = self
                    .store
                    .get_history(history_id)
                    .await?
                    .ok_or(TriggerError::HistoryNotFound(history_id))?;
                if history.app_id != app_id {
                    return Err(TriggerError::ForeignHistory { history_id, app_id });
                }
                let window = history
                    .window
                    .ok_or(TriggerError::NoRecordedWindow(history_id))?;

                NewTicket::new(app_id, window, RunType::Retry, now)
                    .retry_of(history_id)
                    .with_message(format!("retry of history {history_id}"))
            }
            other => {
                let (delay, length) =
                    adhoc_window(other).ok_or(TriggerError::Unsupported(other.as_str()))?;
                // Whole minutes, so repeated clicks land on the same window.
                let local = now.with_timezone(&self.provider_offset).naive_local();
                let until = local.with_second(0).unwrap_or(local) - TimeDelta::minutes(delay);
                let since = until - TimeDelta::minutes(length);
                let window =
                    TimeWindow::new(ProviderTimestamp::new(since), ProviderTimestamp::new(until))?;

                NewTicket::new(app_id, window, other, now)
                    .with_message(format!("{} run requested", other.as_str()))
            }
        };

        let window = ticket.window;
        let created = self.store.create_ticket(ticket).await?;
        info!(
            app_id = %app_id,
            run_type = run_type.as_str(),
            window = %window,
            queued = created.is_some(),
            "manual trigger"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveTime, Offset, TimeZone};
    use playpulse_core::{AppConfig, HistoryStatus, NewHistory};

    use crate::store::{IngestStore, InMemoryIngestStore};

    fn app() -> AppConfig {
        AppConfig {
            id: AppId::new(),
            name: "puzzle".to_string(),
            provider_app_id: "4242".to_string(),
            api_token: "token".to_string(),
            is_active: true,
            schedule_anchor: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            interval_minutes: 60,
        }
    }

    fn setup() -> (Arc<InMemoryIngestStore>, ManualTrigger, AppConfig) {
        let store = Arc::new(InMemoryIngestStore::new());
        let app = app();
        store.insert_app(app.clone());
        let trigger = ManualTrigger::new(store.clone(), Utc.fix());
        (store, trigger, app)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn manual_and_demo_windows() {
        let (store, trigger, app) = setup();

        let manual = trigger
            .enqueue_at(app.id, RunType::Manual, None, noon())
            .await
            .unwrap()
            .unwrap();
        let demo = trigger
            .enqueue_at(app.id, RunType::Demo, None, noon())
            .await
            .unwrap()
            .unwrap();

        let manual = store.get_ticket(manual).await.unwrap().unwrap();
        assert_eq!(manual.window().to_string(), "2024-05-01 10:30:00 -> 2024-05-01 11:00:00");
        let demo = store.get_ticket(demo).await.unwrap().unwrap();
        assert_eq!(demo.window().to_string(), "2024-05-01 11:00:00 -> 2024-05-01 11:15:00");
    }

    #[tokio::test]
    async fn repeated_request_is_a_duplicate() {
        let (_store, trigger, app) = setup();
        let first = trigger.enqueue_at(app.id, RunType::Manual, None, noon()).await.unwrap();
        let second = trigger.enqueue_at(app.id, RunType::Manual, None, noon()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let later = noon() + TimeDelta::seconds(40);
        let third = trigger.enqueue_at(app.id, RunType::Manual, None, later).await.unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn retry_copies_recorded_window() {
        let (store, trigger, app) = setup();
        let window = TimeWindow::new(
            ProviderTimestamp::parse("2024-04-30 22:00:00").unwrap(),
            ProviderTimestamp::parse("2024-04-30 23:00:00").unwrap(),
        )
        .unwrap();
        let history = store
            .create_history(NewHistory::processing(app.id, RunType::Schedule, window, noon()))
            .await
            .unwrap();
        store
            .finalize_history(history, HistoryStatus::Failed, 0)
            .await
            .unwrap();

        let id = trigger
            .enqueue_at(app.id, RunType::Retry, Some(history), noon())
            .await
            .unwrap()
            .unwrap();
        let ticket = store.get_ticket(id).await.unwrap().unwrap();
        assert_eq!(ticket.window(), window);
        assert_eq!(ticket.retry_of_history_id, Some(history));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let (store, trigger, app) = setup();

        assert!(matches!(
            trigger.enqueue_at(AppId::new(), RunType::Manual, None, noon()).await,
            Err(TriggerError::AppNotFound(_))
        ));
        assert!(matches!(
            trigger.enqueue_at(app.id, RunType::Schedule, None, noon()).await,
            Err(TriggerError::Unsupported(_))
        ));
        assert!(matches!(
            trigger.enqueue_at(app.id, RunType::Retry, None, noon()).await,
            Err(TriggerError::MissingRetryTarget)
        ));

        let skipped = store
            .create_history(NewHistory::skipped(app.id, noon(), "busy"))
            .await
            .unwrap();
        assert!(matches!(
            trigger.enqueue_at(app.id, RunType::Retry, Some(skipped), noon()).await,
            Err(TriggerError::NoRecordedWindow(_))
        ));
    }

    #[tokio::test]
    async fn retry_of_another_apps_history_is_rejected() {
        let (store, trigger, app) = setup();
        let other = AppConfig {
            id: AppId::new(),
            name: "racing".to_string(),
            ..app.clone()
        };
        store.insert_app(other.clone());

        let window = TimeWindow::new(
            ProviderTimestamp::parse("2024-04-30 22:00:00").unwrap(),
            ProviderTimestamp::parse("2024-04-30 23:00:00").unwrap(),
        )
        .unwrap();
        let foreign = store
            .create_history(NewHistory::processing(other.id, RunType::Schedule, window, noon()))
            .await
            .unwrap();

        let result = trigger
            .enqueue_at(app.id, RunType::Retry, Some(foreign), noon())
            .await;
        assert!(matches!(
            result,
            Err(TriggerError::ForeignHistory { history_id, app_id })
                if history_id == foreign && app_id == app.id
        ));
        assert!(store.tickets_for(app.id).is_empty());
    }
}
