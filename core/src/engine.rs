//! The rollup engine: the entry point for event producers and readers.
//!
//! INGEST ORDER (fixed):
//!   1. Classify the event (pure, no I/O).
//!   2. In one transaction: record the event watermark, append the delta.
//!   3. Commit before returning, so a returned Ok means the counters landed.
//!
//! RULES:
//!   - An event id is applied at most once; replays return Duplicate.
//!   - A storage failure is returned to the caller and nothing is marked,
//!     so the caller's retry applies the event exactly once.
//!   - Reads always sum squashed and unsquashed records, so they are
//!     correct whatever the compactor is doing.

use crate::{
    applier::DeltaApplier,
    classifier::{classify_event, Classified},
    compactor::{self, CompactionReport, SquashCompactor},
    config::{CompactorConfig, RollupConfig},
    counter::CounterSet,
    error::{RollupError, RollupResult},
    event::RowEvent,
    store::{IngestWrite, PendingIngest, RollupStore},
    types::{AggregateKey, DeltaId, Scope},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// What ingesting one event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied {
        key:      AggregateKey,
        delta_id: DeltaId,
        counters: CounterSet,
    },
    /// The event was recorded but its transition changes no counter.
    NoChange,
    /// The event id was processed before; nothing was written.
    Duplicate,
}

pub struct RollupEngine {
    store: RollupStore,
}

impl RollupEngine {
    pub fn new(store: RollupStore) -> Self {
        Self { store }
    }

    /// Open the configured database and bring its schema up to date.
    pub fn open(config: &RollupConfig) -> RollupResult<Self> {
        config.validate()?;
        let store = RollupStore::from_config(&config.database)?;
        store.migrate()?;
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &RollupStore {
        &self.store
    }

    fn applier(&self) -> DeltaApplier<'_> {
        DeltaApplier::new(&self.store)
    }

    // ── Ingest ─────────────────────────────────────────────────

    pub fn ingest(&self, event: &RowEvent) -> RollupResult<IngestOutcome> {
        check_event_id(event)?;
        let classified = classify_event(event);
        trace_unmapped(event, &classified);

        let written = self.applier().apply_once(&pending(event, &classified))?;
        Ok(outcome(classified, written))
    }

    /// Ingest a batch in one transaction. Either every event is applied
    /// (or found to be a duplicate), or none is.
    pub fn ingest_batch(&self, events: &[RowEvent]) -> RollupResult<Vec<IngestOutcome>> {
        for event in events {
            check_event_id(event)?;
        }
        let classified: Vec<Classified> = events.iter().map(classify_event).collect();
        for (event, c) in events.iter().zip(&classified) {
            trace_unmapped(event, c);
        }

        let items: Vec<PendingIngest<'_>> = events
            .iter()
            .zip(&classified)
            .map(|(event, c)| pending(event, c))
            .collect();
        let written = self.applier().apply_once_batch(&items)?;

        Ok(classified
            .into_iter()
            .zip(written)
            .map(|(c, w)| outcome(c, w))
            .collect())
    }

    // ── Read ───────────────────────────────────────────────────

    /// Current totals for `key`. Every counter declared by the key's scope
    /// is present; a key with no records reads as all zeros.
    pub fn get_totals(&self, key: &AggregateKey) -> RollupResult<CounterSet> {
        let mut totals = CounterSet::zeroed(key.scope().counters());
        totals.merge(&self.store.totals(key)?);
        Ok(totals)
    }

    /// When the latest event counted toward `key` occurred; None for a key
    /// with no records.
    pub fn last_updated(&self, key: &AggregateKey) -> RollupResult<Option<DateTime<Utc>>> {
        self.store.last_updated(key)
    }

    /// Zero-filled totals of every key in `scope`, ordered by key.
    pub fn totals_for_scope(&self, scope: Scope) -> RollupResult<Vec<(AggregateKey, CounterSet)>> {
        Ok(self
            .store
            .totals_for_scope(scope)?
            .into_iter()
            .map(|(key, raw)| {
                let mut totals = CounterSet::zeroed(scope.counters());
                totals.merge(&raw);
                (key, totals)
            })
            .collect())
    }

    // ── Maintenance ────────────────────────────────────────────

    /// A compactor on its own connection to this engine's database.
    /// For in-memory stores this is an isolated database; use `compact` instead.
    pub fn compactor(&self, config: CompactorConfig) -> RollupResult<SquashCompactor> {
        Ok(SquashCompactor::new(self.store.reopen()?, config))
    }

    /// Run one full compaction pass on this engine's own connection.
    pub fn compact(&self, config: &CompactorConfig) -> CompactionReport {
        let holder = format!("engine-{}", uuid::Uuid::new_v4());
        compactor::full_pass(&self.store, config, &holder, &AtomicBool::new(false))
    }

    /// Forget event watermarks older than `cutoff`.
    /// Replays of those events will no longer be detected.
    pub fn prune_watermarks(&self, cutoff: DateTime<Utc>) -> RollupResult<usize> {
        let removed = self.store.prune_processed_events(cutoff)?;
        if removed > 0 {
            log::info!("pruned {removed} event watermarks older than {cutoff}");
        }
        Ok(removed)
    }
}

fn check_event_id(event: &RowEvent) -> RollupResult<()> {
    if event.event_id.trim().is_empty() {
        return Err(RollupError::InvalidEvent("event_id must not be empty".into()));
    }
    Ok(())
}

fn trace_unmapped(event: &RowEvent, classified: &Classified) {
    if classified.is_empty() {
        log::debug!(
            "event={} op={:?} produced no deltas: {:?}",
            event.event_id,
            event.op,
            event.change
        );
    }
}

fn pending<'a>(event: &'a RowEvent, classified: &'a Classified) -> PendingIngest<'a> {
    PendingIngest {
        event_id:    &event.event_id,
        key:         classified.key.as_ref(),
        deltas:      &classified.deltas,
        occurred_at: event.occurred_at,
    }
}

fn outcome(classified: Classified, written: IngestWrite) -> IngestOutcome {
    match (written, classified.key) {
        (IngestWrite::Duplicate, _) => IngestOutcome::Duplicate,
        (IngestWrite::Written(Some(delta_id)), Some(key)) => IngestOutcome::Applied {
            key,
            delta_id,
            counters: classified.deltas,
        },
        (IngestWrite::Written(_), _) => IngestOutcome::NoChange,
    }
}
