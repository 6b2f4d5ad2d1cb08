//! Session aggregation for exported gameplay events.
//!
//! This crate turns one run's raw event batch into per-player, per-level
//! [`SessionAggregate`](playpulse_core::SessionAggregate)s. It is pure domain
//! logic (no IO, no storage, no clock).

pub mod alias;
pub mod cost;
pub mod transform;
pub mod vocabulary;

pub use alias::{AliasTable, GUEST_USER_ID};
pub use cost::{CostTable, DEFAULT_CONSUMABLE_PREFIXES, DEFAULT_UNIT_COST};
pub use transform::{transform, Transformer};
pub use vocabulary::{EventClass, EventVocabulary};
