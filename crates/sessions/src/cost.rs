//! Consumable pricing (per-app booster configuration).

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

/// Unit cost of a consumable with no configured price.
pub const DEFAULT_UNIT_COST: i64 = 1;

/// Payload key prefixes that mark a consumable quantity.
pub const DEFAULT_CONSUMABLE_PREFIXES: &[&str] = &["booster_", "revive_"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTable {
    unit_costs: HashMap<String, i64>,
    prefixes: Vec<String>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            unit_costs: HashMap::new(),
            prefixes: DEFAULT_CONSUMABLE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_unit_costs<I, K>(costs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let mut table = Self::default();
        table
            .unit_costs
            .extend(costs.into_iter().map(|(k, v)| (k.into(), v)));
        table
    }

    pub fn with_unit_cost(mut self, key: impl Into<String>, unit_cost: i64) -> Self {
        self.unit_costs.insert(key.into(), unit_cost);
        self
    }

    pub fn with_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn unit_cost(&self, key: &str) -> i64 {
        self.unit_costs
            .get(key)
            .copied()
            .unwrap_or(DEFAULT_UNIT_COST)
    }

    /// A key is consumable if it carries a known prefix or has an explicit price.
    pub fn is_consumable(&self, key: &str) -> bool {
        self.unit_costs.contains_key(key) || self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Consumable keys in `payload` with a numeric quantity.
    pub fn consumables<'a>(
        &'a self,
        payload: &'a Map<String, JsonValue>,
    ) -> impl Iterator<Item = (&'a str, i64)> + 'a {
        payload.iter().filter_map(move |(key, value)| {
            if !self.is_consumable(key) {
                return None;
            }
            quantity(value).map(|q| (key.as_str(), q))
        })
    }
}

/// Integers, floats (truncated) and numeric strings are quantities.
fn quantity(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[test]
    fn unconfigured_keys_cost_one() {
        let table = CostTable::new().with_unit_cost("booster_hammer", 120);
        assert_eq!(table.unit_cost("booster_hammer"), 120);
        assert_eq!(table.unit_cost("revive_heart"), DEFAULT_UNIT_COST);
    }

    #[test]
    fn only_numeric_consumables_are_yielded() {
        let table = CostTable::new().with_unit_cost("coins_spent", 1);
        let p = payload(json!({
            "booster_hammer": 2,
            "booster_bomb": "3",
            "revive_heart": "lots",
            "revive_ad": true,
            "coins_spent": 1.9,
            "levelID": 4
        }));

        let mut found: Vec<(&str, i64)> = table.consumables(&p).collect();
        found.sort();
        assert_eq!(
            found,
            vec![("booster_bomb", 3), ("booster_hammer", 2), ("coins_spent", 1)]
        );
    }

    #[test]
    fn prefixes_can_be_replaced() {
        let table = CostTable::new().with_prefixes(["pu_"]);
        assert!(table.is_consumable("pu_shuffle"));
        assert!(!table.is_consumable("booster_hammer"));
    }
}
