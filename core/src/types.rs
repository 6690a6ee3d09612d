//! Shared primitive types used across the rollup engine.

use crate::error::{RollupError, RollupResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row id of a DeltaRecord in `rollup_delta`.
pub type DeltaId = i64;

/// A stable, unique identifier for an incoming row event.
pub type EventId = String;

/// The kind of row-level change that produced an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// An aggregate family. Each scope declares the counters its totals carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Broadcast,
    Notification,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Broadcast, Scope::Notification];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast    => "broadcast",
            Self::Notification => "notification",
        }
    }

    /// Counters reported for every key of this scope, zero when absent.
    pub fn counters(&self) -> &'static [&'static str] {
        match self {
            Self::Broadcast => &["sent", "delivered", "failed", "read", "processed", "cost"],
            Self::Notification => &["unseen"],
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = RollupError;

    fn from_str(s: &str) -> RollupResult<Self> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| RollupError::UnknownScope { name: s.to_string() })
    }
}

/// Identifies the row being summarized. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    scope: Scope,
    id:    String,
}

impl AggregateKey {
    pub fn new(scope: Scope, id: impl Into<String>) -> RollupResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RollupError::InvalidKey {
                key:    format!("{scope}/{id}"),
                reason: "id must not be empty".into(),
            });
        }
        Ok(Self { scope, id })
    }

    /// Statistics row of a bulk broadcast.
    pub fn broadcast(broadcast_id: i64) -> Self {
        Self { scope: Scope::Broadcast, id: broadcast_id.to_string() }
    }

    /// Unseen-notification counter of one user within one org.
    pub fn notification(org_id: i64, user_id: i64) -> Self {
        Self { scope: Scope::Notification, id: format!("{org_id}:{user_id}") }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.id)
    }
}
