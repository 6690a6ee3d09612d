//! Delta Applier: persists classified deltas to the append-only log.
//!
//! RULE: Never update a counter in place. Every applied delta becomes a new
//! DeltaRecord carrying all of its counters in one row, so concurrent
//! appliers on the same hot key never contend on a shared row.
//!
//! RULE: The applier does not deduplicate. Exactly-once delivery is the
//! ingest layer's job; `apply_once` exists so that layer can write the
//! watermark and the delta in the same transaction.

use crate::{
    counter::CounterSet,
    error::RollupResult,
    store::{IngestWrite, PendingIngest, RollupStore},
    types::{AggregateKey, DeltaId},
};
use chrono::{DateTime, Utc};

pub struct DeltaApplier<'a> {
    store: &'a RollupStore,
}

impl<'a> DeltaApplier<'a> {
    pub fn new(store: &'a RollupStore) -> Self {
        Self { store }
    }

    /// Append one delta. Empty deltas write nothing and return None.
    pub fn apply(&self, key: &AggregateKey, deltas: &CounterSet) -> RollupResult<Option<DeltaId>> {
        self.apply_at(key, deltas, Utc::now())
    }

    pub fn apply_at(
        &self,
        key:    &AggregateKey,
        deltas: &CounterSet,
        at:     DateTime<Utc>,
    ) -> RollupResult<Option<DeltaId>> {
        if deltas.is_empty() {
            return Ok(None);
        }
        let id = self.store.append_delta(key, deltas, at)?;
        log::trace!("key={key} applied delta {id}: {deltas:?}");
        Ok(Some(id))
    }

    /// Append a batch atomically. Empty items are dropped before writing.
    /// Returns the new record ids in input order, None for dropped items.
    pub fn apply_batch(
        &self,
        batch: &[(AggregateKey, CounterSet)],
    ) -> RollupResult<Vec<Option<DeltaId>>> {
        let writes: Vec<(AggregateKey, CounterSet)> = batch
            .iter()
            .filter(|(_, deltas)| !deltas.is_empty())
            .cloned()
            .collect();
        if writes.is_empty() {
            return Ok(vec![None; batch.len()]);
        }

        let mut ids = self.store.append_deltas(&writes, Utc::now())?.into_iter();
        let placed = batch
            .iter()
            .map(|(_, deltas)| if deltas.is_empty() { None } else { ids.next() })
            .collect();
        log::debug!("applied batch of {} deltas ({} empty)", writes.len(), batch.len() - writes.len());
        Ok(placed)
    }

    /// Append one event's delta together with its watermark.
    pub fn apply_once(&self, item: &PendingIngest<'_>) -> RollupResult<IngestWrite> {
        self.store.ingest_once(item)
    }

    pub fn apply_once_batch(&self, items: &[PendingIngest<'_>]) -> RollupResult<Vec<IngestWrite>> {
        self.store.ingest_many(items)
    }
}
