//! Store methods for the per-event watermark.
//!
//! The watermark row and the event's DeltaRecord are written in the same
//! transaction, so an event is either fully applied and marked, or neither.

use crate::{
    counter::CounterSet,
    error::RollupResult,
    types::{AggregateKey, DeltaId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::{delta::insert_delta, RollupStore};

/// One classified event waiting to be written.
#[derive(Debug, Clone)]
pub struct PendingIngest<'a> {
    pub event_id:    &'a str,
    pub key:         Option<&'a AggregateKey>,
    pub deltas:      &'a CounterSet,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestWrite {
    /// Watermark recorded; the delta id is None when there was nothing to append.
    Written(Option<DeltaId>),
    /// The event id was already recorded; nothing was written.
    Duplicate,
}

/// Record the watermark, then append the delta. Must run inside a transaction.
fn write_one(conn: &Connection, item: &PendingIngest<'_>) -> RollupResult<IngestWrite> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO processed_event (event_id, scope, aggregate_key, processed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            item.event_id,
            item.key.map(|k| k.scope().as_str()),
            item.key.map(|k| k.id()),
            Utc::now().timestamp_millis(),
        ],
    )?;
    if inserted == 0 {
        return Ok(IngestWrite::Duplicate);
    }

    let delta_id = match item.key {
        Some(key) if !item.deltas.is_empty() => {
            Some(insert_delta(conn, key, item.deltas, false, item.occurred_at)?)
        }
        _ => None,
    };
    Ok(IngestWrite::Written(delta_id))
}

impl RollupStore {
    /// Apply one event at most once.
    pub fn ingest_once(&self, item: &PendingIngest<'_>) -> RollupResult<IngestWrite> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let written = write_one(&tx, item)?;
        tx.commit()?;
        Ok(written)
    }

    /// Apply a batch of events in one transaction, each at most once.
    /// Duplicates inside the batch are caught by the same watermark.
    pub fn ingest_many(&self, items: &[PendingIngest<'_>]) -> RollupResult<Vec<IngestWrite>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut written = Vec::with_capacity(items.len());
        for item in items {
            written.push(write_one(&tx, item)?);
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn is_event_processed(&self, event_id: &str) -> RollupResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_event WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn processed_event_count(&self) -> RollupResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_event", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Forget watermarks recorded before `cutoff`. Returns rows removed.
    pub fn prune_processed_events(&self, cutoff: DateTime<Utc>) -> RollupResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM processed_event WHERE processed_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(removed)
    }
}
