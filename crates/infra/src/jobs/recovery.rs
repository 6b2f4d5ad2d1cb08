//! Startup recovery of runs interrupted by a previous process.

use chrono::{FixedOffset, Utc};
use tracing::{info, warn};

use playpulse_core::format_log_entry;

use crate::store::{IngestStore, RecoveryReport, StoreResult};

const RESET_LOG: &str = "reset after restart";

/// Requeue `processing` tickets and fail active histories.
///
/// Must run before the scheduler and dispatcher start; no executor of this
/// process may be live.
pub async fn recover_interrupted(
    store: &dyn IngestStore,
    local_offset: FixedOffset,
) -> StoreResult<RecoveryReport> {
    let now = Utc::now().with_timezone(&local_offset).time();
    let report = store
        .reset_interrupted(&format_log_entry(now, RESET_LOG))
        .await?;

    if report.tickets_requeued > 0 || report.histories_failed > 0 {
        warn!(
            tickets_requeued = report.tickets_requeued,
            histories_failed = report.histories_failed,
            "recovered interrupted runs"
        );
    } else {
        info!("no interrupted runs to recover");
    }
    Ok(report)
}
