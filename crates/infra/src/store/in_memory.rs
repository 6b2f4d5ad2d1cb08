//! In-memory store for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use playpulse_core::{
    AppConfig, AppId, ExecutionHistory, HistoryId, HistoryStatus, JobTicket, NewHistory,
    NewTicket, RawEvent, SessionAggregate, TicketId, TicketStatus, TimeWindow,
};
use playpulse_sessions::{CostTable, EventVocabulary};

use super::{IngestStore, RecoveryReport, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    apps: HashMap<AppId, AppConfig>,
    costs: HashMap<AppId, CostTable>,
    vocabularies: HashMap<AppId, EventVocabulary>,
    tickets: HashMap<TicketId, JobTicket>,
    histories: HashMap<HistoryId, ExecutionHistory>,
    raw_batches: Vec<(AppId, Vec<RawEvent>)>,
    sessions: HashMap<(AppId, HistoryId, String), SessionAggregate>,
    fail_imports: bool,
    reject_tickets: HashSet<AppId>,
    reject_claims: HashSet<TicketId>,
}

#[derive(Debug, Default)]
pub struct InMemoryIngestStore {
    inner: RwLock<Inner>,
}

impl InMemoryIngestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_app(&self, app: AppConfig) {
        self.write().apps.insert(app.id, app);
    }

    pub fn set_cost_table(&self, app_id: AppId, costs: CostTable) {
        self.write().costs.insert(app_id, costs);
    }

    pub fn set_event_vocabulary(&self, app_id: AppId, vocabulary: EventVocabulary) {
        self.write().vocabularies.insert(app_id, vocabulary);
    }

    /// Make raw event and aggregate writes fail until switched back.
    pub fn fail_imports(&self, fail: bool) {
        self.write().fail_imports = fail;
    }

    /// Make `create_ticket` fail for one app.
    pub fn reject_tickets_for(&self, app_id: AppId) {
        self.write().reject_tickets.insert(app_id);
    }

    /// Make moving this ticket from pending to processing fail.
    pub fn reject_claims_for(&self, ticket_id: TicketId) {
        self.write().reject_claims.insert(ticket_id);
    }

    pub fn tickets_for(&self, app_id: AppId) -> Vec<JobTicket> {
        let mut tickets: Vec<JobTicket> = self
            .read()
            .tickets
            .values()
            .filter(|t| t.app_id == app_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.created_at, t.id));
        tickets
    }

    pub fn histories_for(&self, app_id: AppId) -> Vec<ExecutionHistory> {
        let mut histories: Vec<ExecutionHistory> = self
            .read()
            .histories
            .values()
            .filter(|h| h.app_id == app_id)
            .cloned()
            .collect();
        histories.sort_by_key(|h| (h.start_time, h.id));
        histories
    }

    /// Raw event batches written for the app, in insertion order.
    pub fn raw_batches(&self, app_id: AppId) -> Vec<Vec<RawEvent>> {
        self.read()
            .raw_batches
            .iter()
            .filter(|(id, _)| *id == app_id)
            .map(|(_, rows)| rows.clone())
            .collect()
    }

    /// Stored aggregates of the app, by run then session id.
    pub fn sessions(&self, app_id: AppId) -> Vec<SessionAggregate> {
        let inner = self.read();
        let mut keyed: Vec<(&(AppId, HistoryId, String), &SessionAggregate)> = inner
            .sessions
            .iter()
            .filter(|((id, _, _), _)| *id == app_id)
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn sessions_for_run(&self, history_id: HistoryId) -> Vec<SessionAggregate> {
        let inner = self.read();
        let mut keyed: Vec<(&(AppId, HistoryId, String), &SessionAggregate)> = inner
            .sessions
            .iter()
            .filter(|((_, run, _), _)| *run == history_id)
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait::async_trait]
impl IngestStore for InMemoryIngestStore {
    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<TicketId>> {
        let mut inner = self.write();
        if inner.reject_tickets.contains(&ticket.app_id) {
            return Err(StoreError::Storage("ticket insert rejected".to_string()));
        }
        let duplicate = inner.tickets.values().any(|t| {
            t.app_id == ticket.app_id
                && t.date_since == ticket.window.since
                && t.status.is_open()
        });
        if duplicate {
            return Ok(None);
        }

        let ticket = JobTicket::from_new(ticket);
        let id = ticket.id;
        inner.tickets.insert(id, ticket);
        Ok(Some(id))
    }

    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<JobTicket>> {
        Ok(self.read().tickets.get(&id).cloned())
    }

    async fn list_pending_tickets(&self) -> StoreResult<Vec<JobTicket>> {
        let mut pending: Vec<JobTicket> = self
            .read()
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.created_at, t.id));
        Ok(pending)
    }

    async fn update_ticket_status(
        &self,
        id: TicketId,
        status: TicketStatus,
        message: Option<String>,
        increment_retry: bool,
    ) -> StoreResult<JobTicket> {
        let mut inner = self.write();
        let rejected = inner.reject_claims.contains(&id);
        let ticket = inner
            .tickets
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {id}")))?;
        if rejected && ticket.status == TicketStatus::Pending && status == TicketStatus::Processing {
            return Err(StoreError::Storage("ticket claim rejected".to_string()));
        }
        ticket.apply_status(status, message, increment_retry, Utc::now())?;
        Ok(ticket.clone())
    }

    async fn count_tickets_created_since(
        &self,
        app_id: AppId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let count = self
            .read()
            .tickets
            .values()
            .filter(|t| t.app_id == app_id && t.created_at >= since)
            .count();
        Ok(count as u64)
    }

    async fn create_history(&self, history: NewHistory) -> StoreResult<HistoryId> {
        let history = ExecutionHistory::from_new(history);
        let id = history.id;
        self.write().histories.insert(id, history);
        Ok(id)
    }

    async fn get_history(&self, id: HistoryId) -> StoreResult<Option<ExecutionHistory>> {
        Ok(self.read().histories.get(&id).cloned())
    }

    async fn find_active_history(&self, app_id: AppId) -> StoreResult<Option<ExecutionHistory>> {
        Ok(self
            .read()
            .histories
            .values()
            .filter(|h| h.app_id == app_id && h.status.is_active())
            .max_by_key(|h| h.start_time)
            .cloned())
    }

    async fn find_history_window(
        &self,
        app_id: AppId,
        id: HistoryId,
    ) -> StoreResult<Option<TimeWindow>> {
        Ok(self
            .read()
            .histories
            .get(&id)
            .filter(|h| h.app_id == app_id)
            .and_then(|h| h.window))
    }

    async fn append_history_log(&self, id: HistoryId, entry: &str) -> StoreResult<()> {
        let mut inner = self.write();
        let history = inner
            .histories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("history {id}")))?;
        history.append_log(entry);
        Ok(())
    }

    async fn finalize_history(
        &self,
        id: HistoryId,
        status: HistoryStatus,
        total_events: u64,
    ) -> StoreResult<()> {
        let mut inner = self.write();
        let history = inner
            .histories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("history {id}")))?;
        history.finalize(status, total_events, Utc::now())?;
        Ok(())
    }

    async fn insert_raw_events_batch(&self, app_id: AppId, rows: &[RawEvent]) -> StoreResult<u64> {
        let mut inner = self.write();
        if inner.fail_imports {
            return Err(StoreError::Storage("raw event insert rejected".to_string()));
        }
        inner.raw_batches.push((app_id, rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn upsert_session_aggregates(
        &self,
        app_id: AppId,
        history_id: HistoryId,
        rows: &[SessionAggregate],
    ) -> StoreResult<u64> {
        let mut inner = self.write();
        if inner.fail_imports {
            return Err(StoreError::Storage("session upsert rejected".to_string()));
        }
        for row in rows {
            inner
                .sessions
                .insert((app_id, history_id, row.session_id()), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn list_active_apps(&self) -> StoreResult<Vec<AppConfig>> {
        let mut apps: Vec<AppConfig> = self
            .read()
            .apps
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(apps)
    }

    async fn get_app(&self, app_id: AppId) -> StoreResult<Option<AppConfig>> {
        Ok(self.read().apps.get(&app_id).cloned())
    }

    async fn load_cost_table(&self, app_id: AppId) -> StoreResult<CostTable> {
        Ok(self.read().costs.get(&app_id).cloned().unwrap_or_default())
    }

    async fn load_event_vocabulary(&self, app_id: AppId) -> StoreResult<EventVocabulary> {
        Ok(self
            .read()
            .vocabularies
            .get(&app_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn reset_interrupted(&self, log_entry: &str) -> StoreResult<RecoveryReport> {
        let mut inner = self.write();
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for ticket in inner.tickets.values_mut() {
            if ticket.status == TicketStatus::Processing {
                ticket.apply_status(TicketStatus::Pending, None, false, now)?;
                report.tickets_requeued += 1;
            }
        }

        for history in inner.histories.values_mut() {
            if history.status.is_active() {
                history.append_log(log_entry);
                let total = history.total_events;
                history.finalize(HistoryStatus::Failed, total, now)?;
                report.histories_failed += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use playpulse_core::{ProviderTimestamp, RunType};

    fn window(since: &str, until: &str) -> TimeWindow {
        TimeWindow::new(
            ProviderTimestamp::parse(since).unwrap(),
            ProviderTimestamp::parse(until).unwrap(),
        )
        .unwrap()
    }

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

    #[tokio::test]
    async fn duplicate_open_ticket_is_rejected() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        let w = window("2024-05-01 08:00:00", "2024-05-01 09:00:00");

        let first = store
            .create_ticket(NewTicket::new(app_id, w, RunType::Schedule, Utc::now()))
            .await
            .unwrap();
        let second = store
            .create_ticket(NewTicket::new(app_id, w, RunType::Manual, Utc::now()))
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        // Once the first ticket is final the window can be queued again.
        store
            .update_ticket_status(first.unwrap(), TicketStatus::Processing, None, false)
            .await
            .unwrap();
        store
            .update_ticket_status(first.unwrap(), TicketStatus::Failed, None, false)
            .await
            .unwrap();
        let third = store
            .create_ticket(NewTicket::new(app_id, w, RunType::Retry, Utc::now()))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn final_tickets_reject_transitions() {
        let store = InMemoryIngestStore::new();
        let w = window("2024-05-01 08:00:00", "2024-05-01 09:00:00");
        let id = store
            .create_ticket(NewTicket::new(AppId::new(), w, RunType::Manual, Utc::now()))
            .await
            .unwrap()
            .unwrap();

        store
            .update_ticket_status(id, TicketStatus::Cancelled, Some("stop".into()), false)
            .await
            .unwrap();
        let err = store
            .update_ticket_status(id, TicketStatus::Processing, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(_)));
    }

    #[tokio::test]
    async fn pending_tickets_are_oldest_first() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        let now = Utc::now();

        let late = store
            .create_ticket(NewTicket::new(
                app_id,
                window("2024-05-01 09:00:00", "2024-05-01 10:00:00"),
                RunType::Schedule,
                now,
            ))
            .await
            .unwrap()
            .unwrap();
        let early = store
            .create_ticket(NewTicket::new(
                app_id,
                window("2024-05-01 08:00:00", "2024-05-01 09:00:00"),
                RunType::Schedule,
                now - Duration::minutes(5),
            ))
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<TicketId> = store
            .list_pending_tickets()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[tokio::test]
    async fn reset_interrupted_requeues_and_fails() {
        let store = InMemoryIngestStore::new();
        let app = app();
        store.insert_app(app.clone());
        let w = window("2024-05-01 08:00:00", "2024-05-01 09:00:00");

        let ticket = store
            .create_ticket(NewTicket::new(app.id, w, RunType::Schedule, Utc::now()))
            .await
            .unwrap()
            .unwrap();
        store
            .update_ticket_status(ticket, TicketStatus::Processing, None, false)
            .await
            .unwrap();
        let history = store
            .create_history(NewHistory::processing(app.id, RunType::Schedule, w, Utc::now()))
            .await
            .unwrap();

        let report = store.reset_interrupted("\n[00:00:00] reset").await.unwrap();
        assert_eq!(report.tickets_requeued, 1);
        assert_eq!(report.histories_failed, 1);

        let ticket = store.get_ticket(ticket).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);

        let history = store.get_history(history).await.unwrap().unwrap();
        assert_eq!(history.status, HistoryStatus::Failed);
        assert!(history.log.ends_with("reset"));
        assert!(store.find_active_history(app.id).await.unwrap().is_none());
    }

    fn drop_session(user: &str, level: &str) -> SessionAggregate {
        SessionAggregate {
            user_id: user.into(),
            level_id: level.into(),
            start_time: None,
            end_time: None,
            status: playpulse_core::SessionStatus::Drop,
            duration_seconds: 0,
            total_cost: 0,
            consumables: Default::default(),
        }
    }

    #[tokio::test]
    async fn rewriting_a_run_replaces_its_sessions() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        let run = HistoryId::new();
        let mut session = drop_session("u1", "5");

        store
            .upsert_session_aggregates(app_id, run, std::slice::from_ref(&session))
            .await
            .unwrap();
        session.status = playpulse_core::SessionStatus::Win;
        store
            .upsert_session_aggregates(app_id, run, std::slice::from_ref(&session))
            .await
            .unwrap();

        let stored = store.sessions(app_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, playpulse_core::SessionStatus::Win);
    }

    #[tokio::test]
    async fn later_runs_keep_earlier_sessions() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        let (first, second) = (HistoryId::new(), HistoryId::new());

        let mut won = drop_session("u1", "5");
        won.status = playpulse_core::SessionStatus::Win;
        won.total_cost = 360;
        store.upsert_session_aggregates(app_id, first, &[won]).await.unwrap();
        store
            .upsert_session_aggregates(app_id, second, &[drop_session("u1", "5")])
            .await
            .unwrap();

        assert_eq!(store.sessions(app_id).len(), 2);
        let kept = store.sessions_for_run(first);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].status, playpulse_core::SessionStatus::Win);
        assert_eq!(kept[0].total_cost, 360);
    }

    #[tokio::test]
    async fn history_window_is_scoped_to_its_app() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        let w = TimeWindow::new(
            ProviderTimestamp::parse("2024-05-01 08:00:00").unwrap(),
            ProviderTimestamp::parse("2024-05-01 09:00:00").unwrap(),
        )
        .unwrap();
        let history = store
            .create_history(NewHistory::processing(app_id, RunType::Schedule, w, Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.find_history_window(app_id, history).await.unwrap(), Some(w));
        assert_eq!(store.find_history_window(AppId::new(), history).await.unwrap(), None);
    }

    #[tokio::test]
    async fn vocabulary_defaults_until_configured() {
        let store = InMemoryIngestStore::new();
        let app_id = AppId::new();
        assert_eq!(
            store.load_event_vocabulary(app_id).await.unwrap(),
            EventVocabulary::default()
        );

        let custom = EventVocabulary::configured("stage_enter", "stage_clear", "stage_lost");
        store.set_event_vocabulary(app_id, custom.clone());
        assert_eq!(store.load_event_vocabulary(app_id).await.unwrap(), custom);
    }
}
