//! Tenant app configuration (read-only to the pipeline).

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AppId;

/// Cadence used when an app is stored with a zero interval.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// One tenant app pulled from the analytics provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub id: AppId,
    pub name: String,
    /// Application id on the provider side.
    pub provider_app_id: String,
    /// OAuth token sent to the provider.
    pub api_token: String,
    pub is_active: bool,
    /// Local time of day the recurring cycles are anchored to.
    pub schedule_anchor: NaiveTime,
    pub interval_minutes: u32,
}

impl AppConfig {
    /// Effective cadence in minutes (never zero).
    pub fn interval_minutes(&self) -> u32 {
        if self.interval_minutes == 0 {
            DEFAULT_INTERVAL_MINUTES
        } else {
            self.interval_minutes
        }
    }

    /// Check that the app carries the credentials needed to call the provider.
    pub fn validate_credentials(&self) -> DomainResult<()> {
        if self.provider_app_id.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "app {} has no provider application id",
                self.id
            )));
        }
        if self.api_token.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "app {} has no provider api token",
                self.id
            )));
        }
        Ok(())
    }
}
