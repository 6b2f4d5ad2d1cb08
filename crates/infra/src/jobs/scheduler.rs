//! Scheduler: turns app cadences into job tickets.
//!
//! Cycles are anchored to each app's `schedule_anchor` in the local wall
//! clock. A cycle is due during `[expected_run, expected_run + grace)`; the
//! first tick inside that range queues one ticket for the export window
//! that ends `window_delay_minutes` before now.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use playpulse_core::{
    format_log_entry, AppConfig, AppId, DomainResult, NewHistory, NewTicket, ProviderTimestamp,
    RunType, TicketId, TimeWindow,
};

use super::locks::LockRegistry;
use super::worker::WorkerHandle;
use crate::config::IngestConfig;
use crate::store::{SharedStore, StoreError, StoreResult};

const SKIPPED_BUSY_LOG: &str = "skipped: app busy";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub grace: Duration,
    pub window_delay_minutes: u32,
    pub local_offset: FixedOffset,
    pub provider_offset: FixedOffset,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            tick: config.scheduler_tick,
            grace: config.schedule_grace,
            window_delay_minutes: config.window_delay_minutes,
            local_offset: config.local_offset,
            provider_offset: config.provider_offset,
        }
    }
}

/// Start of the cycle containing `now`.
///
/// The anchor is today's `anchor` time, moved back a day if it lies in the
/// future; whole intervals since the anchor are then counted.
pub fn expected_run(anchor: NaiveTime, interval_minutes: u32, now: NaiveDateTime) -> NaiveDateTime {
    let mut anchored = now.date().and_time(anchor);
    if anchored > now {
        anchored -= TimeDelta::days(1);
    }

    let interval = i64::from(interval_minutes.max(1)) * 60;
    let cycles_passed = (now - anchored).num_seconds() / interval;
    anchored + TimeDelta::seconds(cycles_passed * interval)
}

pub fn is_due(expected: NaiveDateTime, now: NaiveDateTime, grace: Duration) -> bool {
    let grace = TimeDelta::seconds(grace.as_secs().min(i64::MAX as u64) as i64);
    expected <= now && now < expected + grace
}

/// Window of one interval ending `delay_minutes` before `now`, in the
/// provider clock.
pub fn export_window(
    now: DateTime<Utc>,
    delay_minutes: u32,
    interval_minutes: u32,
    provider_offset: FixedOffset,
) -> DomainResult<TimeWindow> {
    let until = now.with_timezone(&provider_offset).naive_local()
        - TimeDelta::minutes(i64::from(delay_minutes));
    let since = until - TimeDelta::minutes(i64::from(interval_minutes));
    TimeWindow::new(ProviderTimestamp::new(since), ProviderTimestamp::new(until))
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub created: Vec<TicketId>,
    pub skipped_busy: Vec<AppId>,
    pub duplicates: usize,
    pub failures: usize,
}

enum Decision {
    NotDue,
    AlreadyHandled,
    SkippedBusy,
    Duplicate,
    Created(TicketId),
}

pub struct Scheduler {
    store: SharedStore,
    locks: LockRegistry,
    config: SchedulerConfig,
    /// Last cycle start acted on, per app.
    handled: Mutex<HashMap<AppId, NaiveDateTime>>,
}

impl Scheduler {
    pub fn new(store: SharedStore, locks: LockRegistry, config: SchedulerConfig) -> Self {
        Self {
            store,
            locks,
            config,
            handled: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tick(&self) -> StoreResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Evaluate every active app at `now`. A failure for one app is logged
    /// and counted; the remaining apps are still evaluated.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> StoreResult<TickReport> {
        let apps = self.store.list_active_apps().await?;
        let mut report = TickReport::default();

        for app in apps {
            match self.evaluate(&app, now).await {
                Ok(Decision::Created(id)) => report.created.push(id),
                Ok(Decision::SkippedBusy) => report.skipped_busy.push(app.id),
                Ok(Decision::Duplicate) => report.duplicates += 1,
                Ok(Decision::NotDue | Decision::AlreadyHandled) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(app_id = %app.id, error = %e, "schedule evaluation failed");
                }
            }
        }

        Ok(report)
    }

    async fn evaluate(&self, app: &AppConfig, now: DateTime<Utc>) -> StoreResult<Decision> {
        let local_now = now.with_timezone(&self.config.local_offset).naive_local();
        let expected = expected_run(app.schedule_anchor, app.interval_minutes(), local_now);

        if !is_due(expected, local_now, self.config.grace) {
            return Ok(Decision::NotDue);
        }
        if self.last_handled(app.id) == Some(expected) {
            return Ok(Decision::AlreadyHandled);
        }

        if self.locks.is_busy(app.id) {
            let entry = format_log_entry(local_now.time(), SKIPPED_BUSY_LOG);
            self.store
                .create_history(NewHistory::skipped(app.id, now, entry))
                .await?;
            self.mark_handled(app.id, expected);
            info!(app_id = %app.id, cycle = %expected, "cycle skipped; app busy");
            return Ok(Decision::SkippedBusy);
        }

        let grace = TimeDelta::seconds(self.config.grace.as_secs() as i64);
        if self
            .store
            .count_tickets_created_since(app.id, now - grace)
            .await?
            > 0
        {
            self.mark_handled(app.id, expected);
            debug!(app_id = %app.id, cycle = %expected, "recent ticket exists; cycle handled");
            return Ok(Decision::Duplicate);
        }

        let window = export_window(
            now,
            self.config.window_delay_minutes,
            app.interval_minutes(),
            self.config.provider_offset,
        )
        .map_err(StoreError::from)?;

        let ticket = NewTicket::new(app.id, window, RunType::Schedule, now)
            .with_message(format!("scheduled cycle {}", expected.format("%Y-%m-%d %H:%M")));
        let decision = match self.store.create_ticket(ticket).await? {
            Some(id) => {
                info!(app_id = %app.id, ticket_id = %id, window = %window, "scheduled ticket");
                Decision::Created(id)
            }
            None => Decision::Duplicate,
        };
        self.mark_handled(app.id, expected);
        Ok(decision)
    }

    fn last_handled(&self, app_id: AppId) -> Option<NaiveDateTime> {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&app_id)
            .copied()
    }

    fn mark_handled(&self, app_id: AppId, cycle: NaiveDateTime) {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_id, cycle);
    }

    /// Tick every `config.tick` until shut down.
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            info!(tick_secs = self.config.tick.as_secs(), "scheduler started");
            let mut interval = tokio::time::interval(self.config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.tick().await {
                            Ok(report) if !report.created.is_empty() || report.failures > 0 => {
                                info!(
                                    created = report.created.len(),
                                    skipped = report.skipped_busy.len(),
                                    failures = report.failures,
                                    "scheduler tick"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "scheduler tick failed"),
                        }
                    }
                }
            }

            info!("scheduler stopped");
        });

        WorkerHandle::new("scheduler", shutdown, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Offset, TimeZone};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn anchor(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn anchor_boundary_is_due() {
        let now = at(9, 0, 0);
        let expected = expected_run(anchor(9, 0), 60, now);
        assert_eq!(expected, now);
        assert!(is_due(expected, now, Duration::from_secs(300)));
    }

    #[test]
    fn cycles_count_from_anchor() {
        let expected = expected_run(anchor(9, 0), 60, at(11, 30, 0));
        assert_eq!(expected, at(11, 0, 0));
        assert!(!is_due(expected, at(11, 30, 0), Duration::from_secs(300)));
        assert!(is_due(expected, at(11, 4, 59), Duration::from_secs(300)));
        assert!(!is_due(expected, at(11, 5, 0), Duration::from_secs(300)));
    }

    #[test]
    fn future_anchor_rolls_back_a_day() {
        // 08:10 is before today's 09:00 anchor: cycles count from yesterday 09:00.
        let expected = expected_run(anchor(9, 0), 60, at(8, 10, 0));
        assert_eq!(expected, at(8, 0, 0));
    }

    #[test]
    fn odd_intervals_do_not_align_to_the_hour() {
        let expected = expected_run(anchor(9, 0), 45, at(10, 40, 0));
        assert_eq!(expected, at(10, 30, 0));
    }

    #[test]
    fn window_is_delayed_and_converted() {
        // 10:00 local (UTC+7) is 03:00 UTC; minus 90 minutes delay.
        let local = FixedOffset::east_opt(7 * 3600).unwrap();
        let now = local
            .from_local_datetime(&at(10, 0, 0))
            .single()
            .unwrap()
            .with_timezone(&Utc);

        let window = export_window(now, 90, 60, Utc.fix()).unwrap();
        assert_eq!(window.until.to_string(), "2024-05-01 01:30:00");
        assert_eq!(window.since.to_string(), "2024-05-01 00:30:00");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn expected_run_is_never_after_now_and_within_one_interval(
            anchor_min in 0u32..1440,
            interval in 1u32..720,
            now_min in 0u32..1440,
            now_sec in 0u32..60,
        ) {
            let anchor = NaiveTime::from_hms_opt(anchor_min / 60, anchor_min % 60, 0).unwrap();
            let now = at(now_min / 60, now_min % 60, now_sec);

            let expected = expected_run(anchor, interval, now);
            prop_assert!(expected <= now);
            prop_assert!(now - expected < TimeDelta::minutes(i64::from(interval)));
        }
    }
}
