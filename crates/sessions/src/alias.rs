//! Field alias resolution.
//!
//! Different game builds name the same parameter differently (`levelID`,
//! `missionID`, `level_id`, ...). The alias table lists, per logical field,
//! the payload keys to try in order; the first non-empty value wins.

use serde_json::{Map, Value as JsonValue};

/// User id recorded when no user alias resolves.
pub const GUEST_USER_ID: &str = "Guest";

const LEVEL_ALIASES: &[&str] = &[
    "levelID",
    "missionID",
    "level_id",
    "levelId",
    "dayChallenge",
    "level",
];

const USER_ALIASES: &[&str] = &["userID", "uid", "user_id", "userId", "user"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    level: Vec<String>,
    user: Vec<String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            level: LEVEL_ALIASES.iter().map(|s| s.to_string()).collect(),
            user: USER_ALIASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AliasTable {
    pub fn new(level: Vec<String>, user: Vec<String>) -> Self {
        Self { level, user }
    }

    pub fn level_aliases(&self) -> &[String] {
        &self.level
    }

    pub fn user_aliases(&self) -> &[String] {
        &self.user
    }

    /// Level identifier, or `None` when no alias carries a usable value.
    pub fn resolve_level(&self, payload: &Map<String, JsonValue>) -> Option<String> {
        first_match(&self.level, payload)
    }

    /// User identifier, falling back to [`GUEST_USER_ID`].
    pub fn resolve_user(&self, payload: &Map<String, JsonValue>) -> String {
        first_match(&self.user, payload).unwrap_or_else(|| GUEST_USER_ID.to_string())
    }
}

fn first_match(aliases: &[String], payload: &Map<String, JsonValue>) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| payload.get(key))
        .find_map(identifier)
}

/// Strings and numbers are identifiers. Blank strings, null, booleans and
/// containers are not.
fn identifier(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
