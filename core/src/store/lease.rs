//! Store methods for the compactor lease.

use crate::error::RollupResult;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::time::Duration;

use super::RollupStore;

impl RollupStore {
    /// Take the named lease for `ttl`, unless another holder owns a live one.
    /// Re-acquiring a lease you already hold extends it.
    pub fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> RollupResult<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);
        let changed = self.conn.execute(
            "INSERT INTO compactor_lease (name, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE
                SET holder = excluded.holder, expires_at = excluded.expires_at
              WHERE compactor_lease.expires_at <= ?4
                 OR compactor_lease.holder = excluded.holder",
            params![name, holder, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    /// Give the lease back. A lease held by someone else is left alone.
    pub fn release_lease(&self, name: &str, holder: &str) -> RollupResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM compactor_lease WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(removed == 1)
    }

    /// Current holder of the named lease, if it has not expired.
    pub fn lease_holder(&self, name: &str) -> RollupResult<Option<String>> {
        let holder = self
            .conn
            .query_row(
                "SELECT holder FROM compactor_lease WHERE name = ?1 AND expires_at > ?2",
                params![name, Utc::now().timestamp_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }
}
