//! Store methods for the append-only delta log and its compaction.

use crate::{
    counter::CounterSet,
    error::{RollupError, RollupResult},
    types::{AggregateKey, DeltaId, Scope},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{decode_time, encode_time, RollupStore};

/// One row of `rollup_delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub id:          DeltaId,
    pub key:         AggregateKey,
    pub counters:    CounterSet,
    pub is_squashed: bool,
    pub created_at:  DateTime<Utc>,
}

/// What one squash of one key did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquashOutcome {
    /// Unsquashed records folded into the running total.
    pub merged:      usize,
    /// Id of the new squashed record; None when there was nothing to merge.
    pub squashed_id: Option<DeltaId>,
}

/// Append one record. Callers wrap this in a transaction when they need
/// several appends to land together.
pub(crate) fn insert_delta(
    conn:       &Connection,
    key:        &AggregateKey,
    counters:   &CounterSet,
    squashed:   bool,
    created_at: DateTime<Utc>,
) -> RollupResult<DeltaId> {
    conn.execute(
        "INSERT INTO rollup_delta (scope, aggregate_key, counters, is_squashed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            key.scope().as_str(),
            key.id(),
            counters.to_json()?,
            squashed,
            encode_time(created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn key_from_row(scope: &str, id: String) -> RollupResult<AggregateKey> {
    AggregateKey::new(scope.parse::<Scope>()?, id)
}

impl RollupStore {
    // ── Append ─────────────────────────────────────────────────

    pub fn append_delta(
        &self,
        key:        &AggregateKey,
        counters:   &CounterSet,
        created_at: DateTime<Utc>,
    ) -> RollupResult<DeltaId> {
        insert_delta(&self.conn, key, counters, false, created_at)
    }

    /// Append every item inside one transaction: all land or none do.
    pub fn append_deltas(
        &self,
        items:      &[(AggregateKey, CounterSet)],
        created_at: DateTime<Utc>,
    ) -> RollupResult<Vec<DeltaId>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut ids = Vec::with_capacity(items.len());
        for (key, counters) in items {
            ids.push(insert_delta(&tx, key, counters, false, created_at)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    // ── Read ───────────────────────────────────────────────────

    /// Sum of every record for `key`, squashed and unsquashed.
    /// Only counters that appear in some record are present.
    pub fn totals(&self, key: &AggregateKey) -> RollupResult<CounterSet> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT counters FROM rollup_delta
             WHERE scope = ?1 AND aggregate_key = ?2",
        )?;
        let rows = stmt.query_map(params![key.scope().as_str(), key.id()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut totals = CounterSet::new();
        for raw in rows {
            totals.merge(&CounterSet::from_json(&raw?)?);
        }
        Ok(totals)
    }

    /// Totals for every key of `scope` that has at least one record.
    pub fn totals_for_scope(&self, scope: Scope) -> RollupResult<BTreeMap<AggregateKey, CounterSet>> {
        let mut stmt = self.conn.prepare(
            "SELECT aggregate_key, counters FROM rollup_delta WHERE scope = ?1",
        )?;
        let rows = stmt.query_map(params![scope.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut by_key: BTreeMap<AggregateKey, CounterSet> = BTreeMap::new();
        for row in rows {
            let (id, raw) = row?;
            let key = AggregateKey::new(scope, id)?;
            by_key.entry(key).or_default().merge(&CounterSet::from_json(&raw)?);
        }
        Ok(by_key)
    }

    /// Every record for `key`, oldest first.
    pub fn records_for(&self, key: &AggregateKey) -> RollupResult<Vec<DeltaRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, counters, is_squashed, created_at FROM rollup_delta
             WHERE scope = ?1 AND aggregate_key = ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![key.scope().as_str(), key.id()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, counters, is_squashed, created_at)| {
                Ok(DeltaRecord {
                    id,
                    key: key.clone(),
                    counters: CounterSet::from_json(&counters)?,
                    is_squashed,
                    created_at: decode_time(&created_at)
                        .ok_or(RollupError::InvalidTimestamp { id, value: created_at })?,
                })
            })
            .collect()
    }

    /// Newest `created_at` among the key's records, i.e. when the latest
    /// applied event occurred. Squashing keeps it.
    pub fn last_updated(&self, key: &AggregateKey) -> RollupResult<Option<DateTime<Utc>>> {
        let newest: Option<(DeltaId, String)> = self
            .conn
            .query_row(
                "SELECT id, created_at FROM rollup_delta
                 WHERE scope = ?1 AND aggregate_key = ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![key.scope().as_str(), key.id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        newest
            .map(|(id, value)| decode_time(&value).ok_or(RollupError::InvalidTimestamp { id, value }))
            .transpose()
    }

    pub fn unsquashed_count(&self, key: &AggregateKey) -> RollupResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rollup_delta
             WHERE scope = ?1 AND aggregate_key = ?2 AND is_squashed = 0",
            params![key.scope().as_str(), key.id()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of records of any kind (for tests and summaries).
    pub fn delta_record_count(&self) -> RollupResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM rollup_delta", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Compactor selection ────────────────────────────────────

    /// Distinct keys with at least one unsquashed record, at most `limit`.
    pub fn keys_with_unsquashed(&self, limit: usize) -> RollupResult<Vec<AggregateKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT scope, aggregate_key FROM rollup_delta
             WHERE is_squashed = 0
             ORDER BY scope, aggregate_key
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(scope, id)| key_from_row(&scope, id))
            .collect()
    }

    /// Keys whose unsquashed record count exceeds `threshold`,
    /// largest backlog first, at most `limit`.
    pub fn keys_over_threshold(
        &self,
        threshold: i64,
        limit:     usize,
    ) -> RollupResult<Vec<(AggregateKey, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT scope, aggregate_key, COUNT(*) AS pending FROM rollup_delta
             WHERE is_squashed = 0
             GROUP BY scope, aggregate_key
             HAVING COUNT(*) > ?1
             ORDER BY pending DESC, scope, aggregate_key
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![threshold, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(scope, id, pending)| Ok((key_from_row(&scope, id)?, pending)))
            .collect()
    }

    // ── Squash ─────────────────────────────────────────────────

    /// Fold every unsquashed record of `key` into its single squashed record.
    ///
    /// Runs in one immediate transaction. Only records that exist when the
    /// transaction starts are merged; anything appended later stays
    /// unsquashed for the next pass. Any error rolls the whole merge back.
    pub fn squash(&self, key: &AggregateKey) -> RollupResult<SquashOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let scope = key.scope().as_str();

        let high_water: Option<DeltaId> = tx.query_row(
            "SELECT MAX(id) FROM rollup_delta
             WHERE scope = ?1 AND aggregate_key = ?2 AND is_squashed = 0",
            params![scope, key.id()],
            |row| row.get(0),
        )?;
        let Some(high_water) = high_water else {
            return Ok(SquashOutcome::default());
        };

        let mut total = CounterSet::new();
        let mut merged = 0usize;
        let mut latest: Option<DateTime<Utc>> = None;
        {
            let mut stmt = tx.prepare(
                "SELECT id, counters, is_squashed, created_at FROM rollup_delta
                 WHERE scope = ?1 AND aggregate_key = ?2
                   AND (is_squashed = 1 OR id <= ?3)",
            )?;
            let mut rows = stmt.query(params![scope, key.id(), high_water])?;
            while let Some(row) = rows.next()? {
                let id: DeltaId = row.get(0)?;
                let raw: String = row.get(1)?;
                let squashed: bool = row.get(2)?;
                let created_at: String = row.get(3)?;

                total.merge(&CounterSet::from_json(&raw)?);
                if !squashed {
                    merged += 1;
                }
                let at = decode_time(&created_at)
                    .ok_or(RollupError::InvalidTimestamp { id, value: created_at })?;
                latest = Some(latest.map_or(at, |l| l.max(at)));
            }
        }

        tx.execute(
            "DELETE FROM rollup_delta
             WHERE scope = ?1 AND aggregate_key = ?2
               AND (is_squashed = 1 OR id <= ?3)",
            params![scope, key.id(), high_water],
        )?;
        let squashed_id = insert_delta(&tx, key, &total, true, latest.unwrap_or_else(Utc::now))?;
        tx.commit()?;

        Ok(SquashOutcome {
            merged,
            squashed_id: Some(squashed_id),
        })
    }
}
