//! Batch-to-session transformation.
//!
//! Events are grouped by `(user_id, level_id)` and folded in batch order:
//!
//! - the first start event sets `start_time`
//! - the first win/fail event sets `end_time` and the status; later terminal
//!   events for the same session are ignored
//! - every event of the session contributes its consumable cost
//!
//! Sessions that never saw a terminal event are `DROP` with zero duration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use playpulse_core::{RawEvent, SessionAggregate, SessionStatus};

use crate::alias::AliasTable;
use crate::cost::CostTable;
use crate::vocabulary::{EventClass, EventVocabulary};

/// Aggregate `events` with the default alias table and vocabulary.
pub fn transform(events: &[RawEvent], costs: &CostTable) -> Vec<SessionAggregate> {
    Transformer::new(costs.clone()).transform(events)
}

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    aliases: AliasTable,
    vocabulary: EventVocabulary,
    costs: CostTable,
}

impl Transformer {
    pub fn new(costs: CostTable) -> Self {
        Self {
            costs,
            ..Self::default()
        }
    }

    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: EventVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Output is sorted by `(user_id, level_id)`.
    pub fn transform(&self, events: &[RawEvent]) -> Vec<SessionAggregate> {
        let mut sessions: BTreeMap<(String, String), Draft> = BTreeMap::new();

        for event in events {
            let payload = event.payload();
            let Some(level_id) = self.aliases.resolve_level(&payload) else {
                continue;
            };
            let user_id = self.aliases.resolve_user(&payload);

            let draft = sessions.entry((user_id, level_id)).or_default();
            match self.vocabulary.classify(&event.event_name) {
                EventClass::Start => draft.start(event.occurred_at()),
                EventClass::Win => draft.finish(SessionStatus::Win, event.occurred_at()),
                EventClass::Fail => draft.finish(SessionStatus::Fail, event.occurred_at()),
                EventClass::Other => {}
            }

            for (key, quantity) in self.costs.consumables(&payload) {
                draft.consume(key, quantity, self.costs.unit_cost(key));
            }
        }

        sessions
            .into_iter()
            .map(|((user_id, level_id), draft)| draft.build(user_id, level_id))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Draft {
    started: bool,
    start_time: Option<DateTime<Utc>>,
    /// `Some` once the first terminal event was seen.
    outcome: Option<(SessionStatus, Option<DateTime<Utc>>)>,
    total_cost: i64,
    consumables: BTreeMap<String, i64>,
}

impl Draft {
    fn start(&mut self, at: Option<DateTime<Utc>>) {
        if !self.started {
            self.started = true;
            self.start_time = at;
        }
    }

    fn finish(&mut self, status: SessionStatus, at: Option<DateTime<Utc>>) {
        if self.outcome.is_none() {
            self.outcome = Some((status, at));
        }
    }

    fn consume(&mut self, key: &str, quantity: i64, unit_cost: i64) {
        self.total_cost = self
            .total_cost
            .saturating_add(quantity.saturating_mul(unit_cost));
        let used = self.consumables.entry(key.to_string()).or_insert(0);
        *used = used.saturating_add(quantity);
    }

    fn build(self, user_id: String, level_id: String) -> SessionAggregate {
        let (status, end_time) = self.outcome.unwrap_or((SessionStatus::Drop, None));

        let duration_seconds = match (status, self.start_time, end_time) {
            (SessionStatus::Drop, _, _) => 0,
            (_, Some(start), Some(end)) => (end - start).num_seconds().max(0),
            _ => 0,
        };

        SessionAggregate {
            user_id,
            level_id,
            start_time: self.start_time,
            end_time,
            status,
            duration_seconds,
            total_cost: self.total_cost,
            consumables: self.consumables,
        }
    }
}
