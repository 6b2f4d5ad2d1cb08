//! Postgres-backed ingest store.
//!
//! Schema lives in `crates/infra/migrations/`. Invariants that must hold
//! across processes are enforced by the database:
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | one open ticket per `(app_id, date_since)` | partial unique index `job_tickets_open_window` |
//! | one active history per app | partial unique index `execution_histories_active` |
//! | final tickets stay final | row lock + domain transition check in `update_ticket_status` |
//! | aggregates belong to one run | primary key `(app_id, history_id, session_id)` |

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use playpulse_core::{
    AppConfig, AppId, ExecutionHistory, HistoryId, HistoryStatus, JobTicket, NewHistory,
    NewTicket, ProviderTimestamp, RawEvent, RunType, SessionAggregate, TicketId, TicketStatus,
    TimeWindow,
};
use playpulse_sessions::{CostTable, EventVocabulary};

use super::{IngestStore, RecoveryReport, StoreError, StoreResult};

const SCHEMA: &str = include_str!("../../migrations/0001_ingest_schema.sql");

/// Rows per `UNNEST` insert when persisting a raw export.
const RAW_EVENT_CHUNK: usize = 5_000;

const TICKET_COLUMNS: &str = "id, app_id, date_since, date_until, status, retry_count, run_type, \
     retry_of_history_id, message, created_at, updated_at";

const HISTORY_COLUMNS: &str =
    "id, app_id, start_time, end_time, status, total_events, log, run_type, date_since, date_until";

const APP_COLUMNS: &str =
    "id, name, provider_app_id, api_token, is_active, schedule_anchor, interval_minutes";

pub struct PostgresIngestStore {
    pool: Arc<PgPool>,
}

impl PostgresIngestStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngestStore for PostgresIngestStore {
    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<TicketId>> {
        let id = TicketId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO job_tickets (
                id, app_id, date_since, date_until, status, retry_count, run_type,
                retry_of_history_id, message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $8, $8)
            ON CONFLICT (app_id, date_since) WHERE status IN ('pending', 'processing')
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id.as_uuid())
        .bind(ticket.app_id.as_uuid())
        .bind(ticket.window.since.as_naive())
        .bind(ticket.window.until.as_naive())
        .bind(ticket.run_type.as_str())
        .bind(ticket.retry_of_history_id.map(|h| *h.as_uuid()))
        .bind(ticket.message.as_deref())
        .bind(ticket.created_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_ticket", e))?;

        if row.is_none() {
            debug!(app_id = %ticket.app_id, window = %ticket.window, "open ticket exists; not queued");
        }
        Ok(row.map(|_| id))
    }

    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<JobTicket>> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM job_tickets WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_ticket", e))?;
        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn list_pending_tickets(&self) -> StoreResult<Vec<JobTicket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM job_tickets WHERE status = 'pending' ORDER BY created_at, id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_tickets", e))?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn update_ticket_status(
        &self,
        id: TicketId,
        status: TicketStatus,
        message: Option<String>,
        increment_retry: bool,
    ) -> StoreResult<JobTicket> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_ticket_status", e))?;

        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM job_tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_ticket_status", e))?
        .ok_or_else(|| StoreError::NotFound(format!("ticket {id}")))?;

        let mut ticket = ticket_from_row(&row)?;
        ticket.apply_status(status, message, increment_retry, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE job_tickets
            SET status = $2, retry_count = $3, message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(ticket.status.as_str())
        .bind(ticket.retry_count as i32)
        .bind(ticket.message.as_deref())
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_ticket_status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_ticket_status", e))?;
        Ok(ticket)
    }

    async fn count_tickets_created_since(
        &self,
        app_id: AppId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM job_tickets WHERE app_id = $1 AND created_at >= $2",
        )
        .bind(app_id.as_uuid())
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_tickets_created_since", e))?;

        let total: i64 = row.try_get("total").map_err(decode_error)?;
        Ok(total.max(0) as u64)
    }

    async fn create_history(&self, history: NewHistory) -> StoreResult<HistoryId> {
        let history = ExecutionHistory::from_new(history);
        sqlx::query(
            r#"
            INSERT INTO execution_histories (
                id, app_id, start_time, end_time, status, total_events, log, run_type,
                date_since, date_until
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9)
            "#,
        )
        .bind(history.id.as_uuid())
        .bind(history.app_id.as_uuid())
        .bind(history.start_time)
        .bind(history.end_time)
        .bind(history.status.as_str())
        .bind(&history.log)
        .bind(history.run_type.as_str())
        .bind(history.window.map(|w| w.since.as_naive()))
        .bind(history.window.map(|w| w.until.as_naive()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_history", e))?;
        Ok(history.id)
    }

    async fn get_history(&self, id: HistoryId) -> StoreResult<Option<ExecutionHistory>> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM execution_histories WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_history", e))?;
        row.as_ref().map(history_from_row).transpose()
    }

    async fn find_active_history(&self, app_id: AppId) -> StoreResult<Option<ExecutionHistory>> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM execution_histories \
             WHERE app_id = $1 AND status IN ('Running', 'Processing') \
             ORDER BY start_time DESC LIMIT 1"
        ))
        .bind(app_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_history", e))?;
        row.as_ref().map(history_from_row).transpose()
    }

    async fn find_history_window(
        &self,
        app_id: AppId,
        id: HistoryId,
    ) -> StoreResult<Option<TimeWindow>> {
        Ok(self
            .get_history(id)
            .await?
            .filter(|h| h.app_id == app_id)
            .and_then(|h| h.window))
    }

    async fn append_history_log(&self, id: HistoryId, entry: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE execution_histories SET log = log || $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(entry)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("append_history_log", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("history {id}")));
        }
        Ok(())
    }

    async fn finalize_history(
        &self,
        id: HistoryId,
        status: HistoryStatus,
        total_events: u64,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("finalize_history", e))?;

        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM execution_histories WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finalize_history", e))?
        .ok_or_else(|| StoreError::NotFound(format!("history {id}")))?;

        let mut history = history_from_row(&row)?;
        history.finalize(status, total_events, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE execution_histories
            SET status = $2, total_events = $3, end_time = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(history.status.as_str())
        .bind(history.total_events as i64)
        .bind(history.end_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finalize_history", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("finalize_history", e))?;
        Ok(())
    }

    async fn insert_raw_events_batch(&self, app_id: AppId, rows: &[RawEvent]) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_raw_events_batch", e))?;

        let mut written = 0u64;
        for chunk in rows.chunks(RAW_EVENT_CHUNK) {
            let names: Vec<&str> = chunk.iter().map(|r| r.event_name.as_str()).collect();
            let timestamps: Vec<Option<i64>> = chunk.iter().map(RawEvent::timestamp_secs).collect();
            let payloads: Vec<JsonValue> = chunk
                .iter()
                .map(|r| JsonValue::Object(r.payload()))
                .collect();

            let result = sqlx::query(
                r#"
                INSERT INTO raw_events (app_id, event_name, event_timestamp, event_json)
                SELECT $1, name, ts, payload
                FROM UNNEST($2::text[], $3::bigint[], $4::jsonb[]) AS t(name, ts, payload)
                "#,
            )
            .bind(app_id.as_uuid())
            .bind(&names)
            .bind(&timestamps)
            .bind(&payloads)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_raw_events_batch", e))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_raw_events_batch", e))?;
        Ok(written)
    }

    async fn upsert_session_aggregates(
        &self,
        app_id: AppId,
        history_id: HistoryId,
        rows: &[SessionAggregate],
    ) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("upsert_session_aggregates", e))?;

        for row in rows {
            let consumables = serde_json::to_value(&row.consumables)
                .map_err(|e| StoreError::Storage(format!("encode consumables: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO session_aggregates (
                    app_id, history_id, session_id, user_id, level_id, level_name, start_time,
                    end_time, status, duration_seconds, total_cost, consumables, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
                ON CONFLICT (app_id, history_id, session_id) DO UPDATE SET
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    status = EXCLUDED.status,
                    duration_seconds = EXCLUDED.duration_seconds,
                    total_cost = EXCLUDED.total_cost,
                    consumables = EXCLUDED.consumables,
                    updated_at = now()
                "#,
            )
            .bind(app_id.as_uuid())
            .bind(history_id.as_uuid())
            .bind(row.session_id())
            .bind(&row.user_id)
            .bind(&row.level_id)
            .bind(row.level_name())
            .bind(row.start_time)
            .bind(row.end_time)
            .bind(row.status.as_str())
            .bind(row.duration_seconds)
            .bind(row.total_cost)
            .bind(consumables)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_session_aggregates", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("upsert_session_aggregates", e))?;
        Ok(rows.len() as u64)
    }

    async fn list_active_apps(&self) -> StoreResult<Vec<AppConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE is_active ORDER BY name, id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_apps", e))?;
        rows.iter().map(app_from_row).collect()
    }

    async fn get_app(&self, app_id: AppId) -> StoreResult<Option<AppConfig>> {
        let row = sqlx::query(&format!("SELECT {APP_COLUMNS} FROM apps WHERE id = $1"))
            .bind(app_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_app", e))?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn load_cost_table(&self, app_id: AppId) -> StoreResult<CostTable> {
        let rows = sqlx::query("SELECT consumable_key, unit_cost FROM consumable_costs WHERE app_id = $1")
            .bind(app_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_cost_table", e))?;

        let mut costs = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("consumable_key").map_err(decode_error)?;
            let unit_cost: i64 = row.try_get("unit_cost").map_err(decode_error)?;
            costs.push((key, unit_cost));
        }
        Ok(CostTable::from_unit_costs(costs))
    }

    async fn load_event_vocabulary(&self, app_id: AppId) -> StoreResult<EventVocabulary> {
        let row = sqlx::query(
            r#"
            SELECT level_start_event, level_win_event, level_fail_event
            FROM analytics_config
            WHERE app_id = $1
            "#,
        )
        .bind(app_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_event_vocabulary", e))?;

        let Some(row) = row else {
            return Ok(EventVocabulary::default());
        };
        let start: String = row.try_get("level_start_event").map_err(decode_error)?;
        let win: String = row.try_get("level_win_event").map_err(decode_error)?;
        let fail: String = row.try_get("level_fail_event").map_err(decode_error)?;
        Ok(EventVocabulary::configured(&start, &win, &fail))
    }

    async fn reset_interrupted(&self, log_entry: &str) -> StoreResult<RecoveryReport> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("reset_interrupted", e))?;

        let tickets = sqlx::query(
            "UPDATE job_tickets SET status = 'pending', updated_at = now() WHERE status = 'processing'",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reset_interrupted", e))?;

        let histories = sqlx::query(
            r#"
            UPDATE execution_histories
            SET status = 'Failed', end_time = now(), log = log || $1
            WHERE status IN ('Running', 'Processing')
            "#,
        )
        .bind(log_entry)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reset_interrupted", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("reset_interrupted", e))?;

        Ok(RecoveryReport {
            tickets_requeued: tickets.rows_affected(),
            histories_failed: histories.rows_affected(),
        })
    }
}

fn ticket_from_row(row: &PgRow) -> StoreResult<JobTicket> {
    let retry_count: i32 = row.try_get("retry_count").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let run_type: String = row.try_get("run_type").map_err(decode_error)?;
    let retry_of: Option<Uuid> = row.try_get("retry_of_history_id").map_err(decode_error)?;

    Ok(JobTicket {
        id: TicketId::from_uuid(row.try_get("id").map_err(decode_error)?),
        app_id: AppId::from_uuid(row.try_get("app_id").map_err(decode_error)?),
        date_since: ProviderTimestamp::new(row.try_get("date_since").map_err(decode_error)?),
        date_until: ProviderTimestamp::new(row.try_get("date_until").map_err(decode_error)?),
        status: TicketStatus::parse(&status)?,
        retry_count: retry_count.max(0) as u32,
        run_type: RunType::parse(&run_type)?,
        retry_of_history_id: retry_of.map(HistoryId::from_uuid),
        message: row.try_get("message").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn history_from_row(row: &PgRow) -> StoreResult<ExecutionHistory> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let run_type: String = row.try_get("run_type").map_err(decode_error)?;
    let total_events: i64 = row.try_get("total_events").map_err(decode_error)?;
    let since: Option<NaiveDateTime> = row.try_get("date_since").map_err(decode_error)?;
    let until: Option<NaiveDateTime> = row.try_get("date_until").map_err(decode_error)?;

    let window = match (since, until) {
        (Some(since), Some(until)) => Some(TimeWindow::new(
            ProviderTimestamp::new(since),
            ProviderTimestamp::new(until),
        )?),
        _ => None,
    };

    Ok(ExecutionHistory {
        id: HistoryId::from_uuid(row.try_get("id").map_err(decode_error)?),
        app_id: AppId::from_uuid(row.try_get("app_id").map_err(decode_error)?),
        start_time: row.try_get("start_time").map_err(decode_error)?,
        end_time: row.try_get("end_time").map_err(decode_error)?,
        status: HistoryStatus::parse(&status)?,
        total_events: total_events.max(0) as u64,
        log: row.try_get("log").map_err(decode_error)?,
        run_type: RunType::parse(&run_type)?,
        window,
    })
}

fn app_from_row(row: &PgRow) -> StoreResult<AppConfig> {
    let anchor: NaiveTime = row.try_get("schedule_anchor").map_err(decode_error)?;
    let interval: i32 = row.try_get("interval_minutes").map_err(decode_error)?;

    Ok(AppConfig {
        id: AppId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        provider_app_id: row.try_get("provider_app_id").map_err(decode_error)?,
        api_token: row.try_get("api_token").map_err(decode_error)?,
        is_active: row.try_get("is_active").map_err(decode_error)?,
        schedule_anchor: anchor,
        interval_minutes: interval.max(0) as u32,
    })
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("failed to decode row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row in {operation}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
