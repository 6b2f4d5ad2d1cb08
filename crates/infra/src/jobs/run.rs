//! Logical runs: one execution history shared by every attempt of a fetch.

use chrono::{FixedOffset, Utc};
use tracing::warn;

use playpulse_core::{
    format_log_entry, AppId, HistoryId, HistoryStatus, JobTicket, NewHistory, TimeWindow,
};

use crate::store::{SharedStore, StoreResult};

/// Handle on the history row a run reports into.
pub struct LogicalRun {
    store: SharedStore,
    history_id: HistoryId,
    app_id: AppId,
    local_offset: FixedOffset,
    resumed: bool,
}

impl LogicalRun {
    /// Attach to the app's active history, or open a new `Processing` one
    /// recording `window`.
    pub async fn open(
        store: SharedStore,
        ticket: &JobTicket,
        window: TimeWindow,
        local_offset: FixedOffset,
    ) -> StoreResult<Self> {
        let (history_id, resumed) = match store.find_active_history(ticket.app_id).await? {
            Some(active) => (active.id, true),
            None => {
                let id = store
                    .create_history(NewHistory::processing(
                        ticket.app_id,
                        ticket.run_type,
                        window,
                        Utc::now(),
                    ))
                    .await?;
                (id, false)
            }
        };

        Ok(Self {
            store,
            history_id,
            app_id: ticket.app_id,
            local_offset,
            resumed,
        })
    }

    pub fn history_id(&self) -> HistoryId {
        self.history_id
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Whether an already active history was reused.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Append a timestamped line. A failed write is logged and otherwise
    /// ignored; the run outcome does not depend on its log.
    pub async fn log(&self, line: impl AsRef<str>) {
        let now = Utc::now().with_timezone(&self.local_offset).time();
        let entry = format_log_entry(now, line.as_ref());
        if let Err(e) = self.store.append_history_log(self.history_id, &entry).await {
            warn!(history_id = %self.history_id, error = %e, "failed to append history log");
        }
    }

    pub async fn finalize(&self, status: HistoryStatus, total_events: u64) -> StoreResult<()> {
        self.store
            .finalize_history(self.history_id, status, total_events)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use playpulse_core::{NewTicket, ProviderTimestamp, RunType};

    use crate::store::{IngestStore, InMemoryIngestStore};

    fn window() -> TimeWindow {
        TimeWindow::new(
            ProviderTimestamp::parse("2024-05-01 08:00:00").unwrap(),
            ProviderTimestamp::parse("2024-05-01 09:00:00").unwrap(),
        )
        .unwrap()
    }

    fn ticket(app_id: AppId) -> JobTicket {
        JobTicket::from_new(NewTicket::new(app_id, window(), RunType::Manual, Utc::now()))
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[tokio::test]
    async fn opens_new_history_with_window() {
        let store = Arc::new(InMemoryIngestStore::new());
        let app_id = AppId::new();

        let run = LogicalRun::open(store.clone(), &ticket(app_id), window(), offset())
            .await
            .unwrap();
        assert!(!run.resumed());

        let history = store.get_history(run.history_id()).await.unwrap().unwrap();
        assert_eq!(history.status, HistoryStatus::Processing);
        assert_eq!(history.run_type, RunType::Manual);
        assert_eq!(history.window, Some(window()));
    }

    #[tokio::test]
    async fn reuses_active_history() {
        let store = Arc::new(InMemoryIngestStore::new());
        let app_id = AppId::new();

        let first = LogicalRun::open(store.clone(), &ticket(app_id), window(), offset())
            .await
            .unwrap();
        let second = LogicalRun::open(store.clone(), &ticket(app_id), window(), offset())
            .await
            .unwrap();

        assert!(second.resumed());
        assert_eq!(first.history_id(), second.history_id());
        assert_eq!(store.histories_for(app_id).len(), 1);
    }

    #[tokio::test]
    async fn log_lines_accumulate_until_finalized() {
        let store = Arc::new(InMemoryIngestStore::new());
        let run = LogicalRun::open(store.clone(), &ticket(AppId::new()), window(), offset())
            .await
            .unwrap();

        run.log("first").await;
        run.log("second").await;
        run.finalize(HistoryStatus::Success, 3).await.unwrap();

        let history = store.get_history(run.history_id()).await.unwrap().unwrap();
        assert_eq!(history.log.matches('\n').count(), 2);
        assert!(history.log.ends_with("] second"));
        assert_eq!(history.total_events, 3);
        assert!(run.finalize(HistoryStatus::Failed, 0).await.is_err());
    }
}
