//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Classifiers, the applier, and the compactor call store methods;
//! they never execute SQL directly.
//!
//! Each RollupStore owns one connection. Concurrent writers (threads or
//! processes) each open their own store on the same database file; SQLite's
//! write lock serializes them and the busy timeout absorbs the waiting.

use crate::{config::DatabaseConfig, error::RollupResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::time::Duration;

mod delta;
mod lease;
mod watermark;

pub use delta::{DeltaRecord, SquashOutcome};
pub use watermark::{IngestWrite, PendingIngest};

const IN_MEMORY: &str = ":memory:";

pub struct RollupStore {
    conn:         Connection,
    path:         Option<String>, // None for :memory:, Some(path) for file
    busy_timeout: Duration,
}

impl RollupStore {
    pub fn open(path: &str) -> RollupResult<Self> {
        Self::open_with_timeout(path, Duration::from_millis(DatabaseConfig::default().busy_timeout_ms))
    }

    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> RollupResult<Self> {
        if path == IN_MEMORY {
            return Self::in_memory();
        }
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(busy_timeout)?;
        // WAL lets readers sum totals while a writer appends.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            busy_timeout,
        })
    }

    pub fn from_config(config: &DatabaseConfig) -> RollupResult<Self> {
        Self::open_with_timeout(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RollupResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: None,
            busy_timeout: Duration::from_millis(DatabaseConfig::default().busy_timeout_ms),
        })
    }

    /// Open a new connection to the same database.
    /// For in-memory databases this returns a new, isolated database.
    pub fn reopen(&self) -> RollupResult<Self> {
        match &self.path {
            Some(p) => Self::open_with_timeout(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Safe to run on every open.
    pub fn migrate(&self) -> RollupResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_rollup_delta.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_processed_event.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_compactor_lease.sql"))?;
        Ok(())
    }
}

// ── Time encoding ──────────────────────────────────────────────

/// Fixed-width RFC 3339 so text comparison matches time order.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
