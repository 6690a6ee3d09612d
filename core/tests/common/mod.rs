#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rollup_core::{
    event::{MsgStatus, RowChange, RowEvent},
    store::RollupStore,
    types::Operation,
    RollupEngine,
};

/// Route `log` output to the test harness. Set RUST_LOG to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn memory_store() -> RollupStore {
    let store = RollupStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

pub fn memory_engine() -> RollupEngine {
    RollupEngine::new(memory_store())
}

/// A migrated database file inside a temp dir. Keep the dir alive.
pub fn temp_db(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let store = RollupStore::open(path.to_str().expect("utf-8 path")).expect("open store");
    store.migrate().expect("migration");
    (dir, path)
}

pub fn open_store(path: &PathBuf) -> RollupStore {
    RollupStore::open(path.to_str().expect("utf-8 path")).expect("open store")
}

/// Side connection for installing failure triggers.
pub fn raw_connection(path: &PathBuf) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(path).expect("open raw connection");
    conn.busy_timeout(Duration::from_secs(10)).expect("busy timeout");
    conn
}

pub fn msg_event(
    event_id:     &str,
    op:           Operation,
    broadcast_id: i64,
    old_status:   Option<MsgStatus>,
    new_status:   MsgStatus,
) -> RowEvent {
    RowEvent::new(
        event_id,
        op,
        RowChange::MsgStatus {
            broadcast_id: Some(broadcast_id),
            old_status,
            new_status: Some(new_status),
        },
    )
}

pub fn seen_event(
    event_id: &str,
    op:       Operation,
    org_id:   i64,
    user_id:  i64,
    old_seen: Option<bool>,
    new_seen: Option<bool>,
) -> RowEvent {
    RowEvent::new(
        event_id,
        op,
        RowChange::NotificationSeen { org_id, user_id, old_seen, new_seen },
    )
}

/// Poll `f` until it returns Some, panicking after `timeout`.
pub fn eventually<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let start = Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
