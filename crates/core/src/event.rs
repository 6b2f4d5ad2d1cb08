//! Raw provider events as exported by the Logs API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One exported event row.
///
/// The provider is loose about types: `event_timestamp` arrives as a number
/// or a numeric string and `event_json` as an object or a JSON-encoded string
/// (sometimes encoded twice). Decoding is tolerant; interpretation happens in
/// [`RawEvent::payload`] and [`RawEvent::occurred_at`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default = "unknown_event_name")]
    pub event_name: String,
    #[serde(default)]
    pub event_timestamp: JsonValue,
    #[serde(default)]
    pub event_json: JsonValue,
}

fn unknown_event_name() -> String {
    "unknown".to_string()
}

impl RawEvent {
    pub fn new(event_name: impl Into<String>, event_timestamp: i64, event_json: JsonValue) -> Self {
        Self {
            event_name: event_name.into(),
            event_timestamp: JsonValue::from(event_timestamp),
            event_json,
        }
    }

    /// Unix seconds, if the provider sent something numeric.
    pub fn timestamp_secs(&self) -> Option<i64> {
        match &self.event_timestamp {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_secs()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Decoded event parameters as a flat object.
    ///
    /// A string payload is parsed as JSON. If the resulting object carries a
    /// nested `event_json` string, that inner object is decoded and merged
    /// over the outer one. Anything undecodable yields an empty map.
    pub fn payload(&self) -> Map<String, JsonValue> {
        let mut outer = match decode_object(&self.event_json) {
            Some(map) => map,
            None => return Map::new(),
        };

        let inner = match outer.get("event_json") {
            Some(JsonValue::String(s)) => serde_json::from_str::<JsonValue>(s)
                .ok()
                .and_then(|v| match v {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                }),
            _ => None,
        };

        if let Some(inner) = inner {
            outer.extend(inner);
        }
        outer
    }
}

fn decode_object(value: &JsonValue) -> Option<Map<String, JsonValue>> {
    match value {
        JsonValue::Object(map) => Some(map.clone()),
        JsonValue::String(s) if !s.trim().is_empty() => match serde_json::from_str(s).ok()? {
            JsonValue::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}
