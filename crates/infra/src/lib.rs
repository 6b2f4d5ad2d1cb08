//! Infrastructure layer: storage, provider client, config and the job
//! scheduling/execution runtime.

pub mod config;
pub mod jobs;
pub mod provider;
pub mod store;


pub use config::{ConfigError, IngestConfig};
