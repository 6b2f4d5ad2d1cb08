//! Cooperative cancellation of running histories.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use playpulse_core::HistoryId;

/// Live cancellation tokens keyed by history id.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<HistoryId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<HistoryId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for a run that is starting. An existing token is reused so a
    /// cancel signalled between attempts is not lost.
    pub fn register(&self, history_id: HistoryId) -> CancellationToken {
        self.map().entry(history_id).or_default().clone()
    }

    /// Returns `false` when no run with this history is live.
    pub fn signal_cancel(&self, history_id: HistoryId) -> bool {
        match self.map().get(&history_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn discard(&self, history_id: HistoryId) {
        self.map().remove(&history_id);
    }

    pub fn is_registered(&self, history_id: HistoryId) -> bool {
        self.map().contains_key(&history_id)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// Sleep for `duration` unless `token` fires first.
pub async fn cancellable_sleep(token: &CancellationToken, duration: Duration) -> WaitOutcome {
    tokio::select! {
        biased;
        _ = token.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
    }
}
