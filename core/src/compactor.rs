//! Squash Compactor: folds unsquashed DeltaRecords into running totals.
//!
//! RULE: Compaction is maintenance. It never changes any key's totals,
//! and its failures are logged and counted, never propagated to the
//! producers of events.
//!
//! Two kinds of pass:
//!   - full pass:     every key with unsquashed records (up to batch_size keys)
//!   - watchdog pass: only keys whose backlog exceeds unsquashed_threshold
//!
//! Each key is squashed in its own transaction, so a pass can be stopped
//! between keys, or killed mid-key, without leaving a partial merge.
//! Passes take the "squash" lease so two compactors never overlap.

use crate::{
    config::CompactorConfig,
    error::RollupResult,
    store::{RollupStore, SquashOutcome},
    types::AggregateKey,
};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub const SQUASH_LEASE: &str = "squash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Full,
    Watchdog,
}

/// Summary of one compaction pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub kind:           PassKind,
    pub keys_squashed:  usize,
    pub records_merged: usize,
    pub failures:       usize,
    /// True when another compactor held the lease and nothing was done.
    pub skipped:        bool,
    /// True when the pass stopped early on request.
    pub cancelled:      bool,
    pub elapsed_ms:     u64,
}

impl CompactionReport {
    fn new(kind: PassKind) -> Self {
        Self {
            kind,
            keys_squashed:  0,
            records_merged: 0,
            failures:       0,
            skipped:        false,
            cancelled:      false,
            elapsed_ms:     0,
        }
    }
}

pub struct SquashCompactor {
    store:  RollupStore,
    config: CompactorConfig,
    holder: String,
    cancel: Arc<AtomicBool>,
}

impl SquashCompactor {
    /// The compactor owns its store: give it its own connection.
    pub fn new(store: RollupStore, config: CompactorConfig) -> Self {
        Self {
            store,
            config,
            holder: format!("compactor-{}", uuid::Uuid::new_v4()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn store(&self) -> &RollupStore {
        &self.store
    }

    /// Squash one key now, regardless of thresholds. Errors are returned.
    pub fn squash_key(&self, key: &AggregateKey) -> RollupResult<SquashOutcome> {
        self.store.squash(key)
    }

    /// Squash every key with unsquashed records, up to batch_size keys.
    pub fn run_once(&self) -> CompactionReport {
        full_pass(&self.store, &self.config, &self.holder, &self.cancel)
    }

    /// Squash only keys whose backlog exceeds the configured threshold.
    pub fn run_over_threshold(&self) -> CompactionReport {
        watchdog_pass(&self.store, &self.config, &self.holder, &self.cancel)
    }

    /// Move the compactor onto a background thread.
    ///
    /// The thread runs a watchdog pass every watchdog interval and a full
    /// pass every interval, until the returned handle is stopped or dropped.
    pub fn spawn_periodic(self) -> RollupResult<CompactorHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cancel = Arc::clone(&self.cancel);

        let join = thread::Builder::new()
            .name("rollup-compactor".into())
            .spawn(move || {
                let mut last_full = Instant::now();
                let mut passes = 0u64;
                loop {
                    match stop_rx.recv_timeout(self.config.watchdog_interval()) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let full = last_full.elapsed() >= self.config.interval();
                    let pass = panic::catch_unwind(AssertUnwindSafe(|| {
                        if full {
                            self.run_once();
                        } else {
                            self.run_over_threshold();
                        }
                    }));
                    if full {
                        last_full = Instant::now();
                    }
                    if pass.is_err() {
                        log::error!("compactor {} pass panicked; retrying next interval", self.holder);
                    }
                    passes += 1;
                }
                log::debug!("compactor {} stopped after {passes} passes", self.holder);
            })
            .map_err(|e| anyhow::anyhow!("cannot spawn compactor thread: {e}"))?;

        Ok(CompactorHandle {
            stop_tx: Some(stop_tx),
            cancel,
            join: Some(join),
        })
    }
}

/// Full pass on any store connection.
pub fn full_pass(
    store:  &RollupStore,
    config: &CompactorConfig,
    holder: &str,
    cancel: &AtomicBool,
) -> CompactionReport {
    let limit = config.batch_size;
    run_pass(store, config, holder, cancel, PassKind::Full, |store| {
        store.keys_with_unsquashed(limit)
    })
}

/// Watchdog pass on any store connection.
pub fn watchdog_pass(
    store:  &RollupStore,
    config: &CompactorConfig,
    holder: &str,
    cancel: &AtomicBool,
) -> CompactionReport {
    let threshold = config.unsquashed_threshold;
    let limit = config.batch_size;
    run_pass(store, config, holder, cancel, PassKind::Watchdog, |store| {
        let keys = store.keys_over_threshold(threshold, limit)?;
        for (key, pending) in &keys {
            log::warn!("key={key} backlog {pending} unsquashed records exceeds {threshold}");
        }
        Ok(keys.into_iter().map(|(key, _)| key).collect())
    })
}

fn run_pass<F>(
    store:  &RollupStore,
    config: &CompactorConfig,
    holder: &str,
    cancel: &AtomicBool,
    kind:   PassKind,
    select: F,
) -> CompactionReport
where
    F: FnOnce(&RollupStore) -> RollupResult<Vec<AggregateKey>>,
{
    let started = Instant::now();
    let mut report = CompactionReport::new(kind);

    match store.try_acquire_lease(SQUASH_LEASE, holder, config.lease_ttl()) {
        Ok(true) => {}
        Ok(false) => {
            log::warn!("{kind:?} pass skipped: squash lease held by another compactor");
            report.skipped = true;
            return report;
        }
        Err(e) => {
            log::error!("{kind:?} pass aborted: cannot take squash lease: {e}");
            report.failures += 1;
            return report;
        }
    }

    match select(store) {
        Ok(keys) => {
            for key in keys {
                if cancel.load(Ordering::SeqCst) {
                    report.cancelled = true;
                    break;
                }
                match store.squash(&key) {
                    Ok(outcome) => {
                        if outcome.squashed_id.is_some() {
                            report.keys_squashed += 1;
                            report.records_merged += outcome.merged;
                        }
                        log::debug!("key={key} squashed {} records", outcome.merged);
                    }
                    Err(e) => {
                        report.failures += 1;
                        log::error!("key={key} squash failed, rolled back: {e}");
                    }
                }
            }
        }
        Err(e) => {
            report.failures += 1;
            log::error!("{kind:?} pass could not select keys: {e}");
        }
    }

    if let Err(e) = store.release_lease(SQUASH_LEASE, holder) {
        log::warn!("could not release squash lease: {e}");
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    if report.keys_squashed > 0 || report.failures > 0 {
        log::info!(
            "{kind:?} pass: squashed {} keys ({} records) in {}ms, {} failures",
            report.keys_squashed,
            report.records_merged,
            report.elapsed_ms,
            report.failures
        );
    }
    report
}

/// Stops the background compactor when stopped or dropped.
pub struct CompactorHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    cancel:  Arc<AtomicBool>,
    join:    Option<JoinHandle<()>>,
}

impl CompactorHandle {
    /// Interrupt the current pass between keys and wait for the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("compactor thread panicked");
            }
        }
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
