//! Handle for the periodic background loops.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Controls one spawned loop (scheduler or dispatcher).
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(name: &'static str, shutdown: Arc<Notify>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop after its current tick and wait for it to exit.
    /// Runs already spawned by the loop are not affected.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            warn!(worker = self.name, error = %e, "worker task ended abnormally");
        }
    }
}
