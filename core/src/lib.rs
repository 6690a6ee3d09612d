//! Aggregate rollup engine.
//!
//! Row events (message status changes, notification seen flips) are
//! classified into counter deltas, appended to a per-aggregate delta log,
//! and periodically squashed into running totals.

pub mod applier;
pub mod broadcast_classifier;
pub mod classifier;
pub mod compactor;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod event;
pub mod store;
pub mod types;
pub mod unseen_classifier;

pub use counter::CounterSet;
pub use engine::{IngestOutcome, RollupEngine};
pub use error::{RollupError, RollupResult};
pub use event::{MsgStatus, RowChange, RowEvent};
pub use types::{AggregateKey, Operation, Scope};
