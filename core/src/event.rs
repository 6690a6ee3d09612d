//! Incoming row events: the only input the rollup engine accepts.
//!
//! RULE: An event describes one row-level change of a source entity
//! (a message, a notification). It carries the old and new state and the
//! identity of the aggregate it rolls up into. It never carries counters.

use crate::types::{AggregateKey, EventId, Operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain-specific values attached to an event (e.g. `template_price`).
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

/// Largest magnitude accepted from a numeric extra field.
pub const MAX_FIELD_VALUE: i64 = 1_000_000_000_000_000;

/// Read a numeric extra field as an integer.
/// Missing, null, or malformed values read as 0. Fractions are rounded.
/// Values beyond MAX_FIELD_VALUE are treated as malformed.
pub fn numeric_field(extra: &ExtraFields, name: &str) -> i64 {
    let parsed = match extra.get(name) {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        }
        _ => None,
    };
    match parsed {
        Some(v) if (-MAX_FIELD_VALUE..=MAX_FIELD_VALUE).contains(&v) => v,
        Some(v) => {
            log::warn!("field={name} value {v} out of range, read as 0");
            0
        }
        None => 0,
    }
}

/// Message delivery status, persisted as single-letter codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MsgStatus {
    #[serde(rename = "I", alias = "initializing")]
    Initializing,
    #[serde(rename = "P", alias = "pending")]
    Pending,
    #[serde(rename = "Q", alias = "queued")]
    Queued,
    #[serde(rename = "W", alias = "wired")]
    Wired,
    #[serde(rename = "S", alias = "sent")]
    Sent,
    #[serde(rename = "D", alias = "delivered")]
    Delivered,
    #[serde(rename = "H", alias = "handled")]
    Handled,
    #[serde(rename = "E", alias = "errored")]
    Errored,
    #[serde(rename = "F", alias = "failed")]
    Failed,
    #[serde(rename = "V", alias = "read")]
    Read,
}

impl MsgStatus {
    pub fn code(&self) -> char {
        match self {
            Self::Initializing => 'I',
            Self::Pending      => 'P',
            Self::Queued       => 'Q',
            Self::Wired        => 'W',
            Self::Sent         => 'S',
            Self::Delivered    => 'D',
            Self::Handled      => 'H',
            Self::Errored      => 'E',
            Self::Failed       => 'F',
            Self::Read         => 'V',
        }
    }
}

/// What changed, and on which source entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowChange {
    /// A message row was inserted, or its status changed.
    MsgStatus {
        /// None for messages that are not part of a broadcast.
        #[serde(default)]
        broadcast_id: Option<i64>,
        #[serde(default)]
        old_status:   Option<MsgStatus>,
        #[serde(default)]
        new_status:   Option<MsgStatus>,
    },
    /// A notification row was inserted, deleted, or its seen flag flipped.
    NotificationSeen {
        org_id:   i64,
        user_id:  i64,
        #[serde(default)]
        old_seen: Option<bool>,
        #[serde(default)]
        new_seen: Option<bool>,
    },
}

impl RowChange {
    /// The aggregate this change rolls up into, if any.
    pub fn aggregate_key(&self) -> Option<AggregateKey> {
        match self {
            Self::MsgStatus { broadcast_id, .. } => broadcast_id.map(AggregateKey::broadcast),
            Self::NotificationSeen { org_id, user_id, .. } => {
                Some(AggregateKey::notification(*org_id, *user_id))
            }
        }
    }
}

/// The event envelope as delivered by the event source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowEvent {
    #[serde(default)]
    pub event_id:    EventId,
    pub op:          Operation,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub extra:       ExtraFields,
    #[serde(flatten)]
    pub change:      RowChange,
}

impl RowEvent {
    pub fn new(event_id: impl Into<EventId>, op: Operation, change: RowChange) -> Self {
        Self {
            event_id: event_id.into(),
            op,
            occurred_at: Utc::now(),
            extra: ExtraFields::new(),
            change,
        }
    }

    /// Attach one extra field.
    pub fn with_extra(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
