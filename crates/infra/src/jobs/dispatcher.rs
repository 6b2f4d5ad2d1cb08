//! Dispatcher: hands pending tickets to executors, one run per app.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use playpulse_core::{AppId, TicketStatus};

use super::executor::{Executor, RunOutcome};
use super::locks::LockRegistry;
use super::worker::WorkerHandle;
use crate::store::{SharedStore, StoreResult};

pub struct Dispatcher {
    store: SharedStore,
    locks: LockRegistry,
    executor: Arc<Executor>,
}

impl Dispatcher {
    pub fn new(store: SharedStore, locks: LockRegistry, executor: Arc<Executor>) -> Self {
        Self {
            store,
            locks,
            executor,
        }
    }

    /// One pass over the pending queue, oldest first.
    ///
    /// A ticket whose app is busy stays pending for a later pass. When a
    /// claim fails, the app's younger tickets wait for the next pass too.
    /// Returns the spawned runs.
    pub async fn dispatch_once(&self) -> StoreResult<Vec<JoinHandle<RunOutcome>>> {
        let pending = self.store.list_pending_tickets().await?;
        let mut spawned = Vec::new();
        let mut held_back: HashSet<AppId> = HashSet::new();

        for ticket in pending {
            if held_back.contains(&ticket.app_id) {
                continue;
            }
            let Some(lock) = self.locks.try_acquire(ticket.app_id) else {
                debug!(app_id = %ticket.app_id, ticket_id = %ticket.id, "app busy; ticket stays pending");
                continue;
            };

            let ticket = match self
                .store
                .update_ticket_status(ticket.id, TicketStatus::Processing, None, false)
                .await
            {
                Ok(ticket) => ticket,
                Err(e) => {
                    warn!(ticket_id = %ticket.id, error = %e, "failed to claim ticket");
                    held_back.insert(ticket.app_id);
                    drop(lock);
                    continue;
                }
            };

            info!(app_id = %ticket.app_id, ticket_id = %ticket.id, "dispatching ticket");
            let executor = self.executor.clone();
            spawned.push(tokio::spawn(async move { executor.run(ticket, lock).await }));
        }

        Ok(spawned)
    }

    /// Run [`Dispatcher::dispatch_once`] every `tick` until shut down.
    pub fn spawn(self, tick: Duration) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            info!(tick_secs = tick.as_secs(), "dispatcher started");
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        info!("dispatcher received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.dispatch_once().await {
                            Ok(spawned) if !spawned.is_empty() => {
                                debug!(runs = spawned.len(), "dispatch pass spawned runs");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "dispatch pass failed"),
                        }
                    }
                }
            }

            info!("dispatcher stopped");
        });

        WorkerHandle::new("dispatcher", shutdown, join)
    }
}
