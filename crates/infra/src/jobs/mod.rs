//! Job scheduling and execution.
//!
//! ## Flow
//!
//! - `Scheduler` decides per app when a window is due and queues a ticket
//! - `ManualTrigger` queues operator-requested runs
//! - `Dispatcher` claims pending tickets, one live run per app
//! - `Executor` fetches the export, imports it and closes ticket and history
//!
//! ## Shared state
//!
//! - `LockRegistry`: apps with a live run
//! - `CancellationRegistry`: cancellation tokens of live runs

pub mod cancel;
pub mod dispatcher;
pub mod executor;
pub mod locks;
pub mod recovery;
pub mod run;
pub mod scheduler;
pub mod trigger;
pub mod worker;

pub use cancel::{cancellable_sleep, CancellationRegistry, WaitOutcome};
pub use dispatcher::Dispatcher;
pub use executor::{classify, Executor, ExecutorConfig, FetchOutcome, RunFailure, RunOutcome};
pub use locks::{AppLock, LockRegistry};
pub use recovery::recover_interrupted;
pub use run::LogicalRun;
pub use scheduler::{Scheduler, SchedulerConfig, TickReport};
pub use trigger::{ManualTrigger, TriggerError};
pub use worker::WorkerHandle;
