//! Per-player, per-level session aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Win,
    Fail,
    /// No terminal event was observed: the player left mid-level.
    Drop,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Win => "WIN",
            SessionStatus::Fail => "FAIL",
            SessionStatus::Drop => "DROP",
        }
    }
}

/// Summary of one (user, level) session within one run's event batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub user_id: String,
    pub level_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub duration_seconds: i64,
    pub total_cost: i64,
    /// Quantity used per consumable key (e.g. `booster_hammer -> 2`).
    pub consumables: BTreeMap<String, i64>,
}

impl SessionAggregate {
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.user_id, self.level_id)
    }

    pub fn level_name(&self) -> String {
        format!("Level {}", self.level_id)
    }
}
