use crate::error::{RollupError, RollupResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path, or ":memory:".
    pub path:            String,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:            "rollup.db".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactorConfig {
    /// Period of the full pass over every key with unsquashed records.
    pub interval_ms:          u64,
    /// Period of the threshold watchdog pass. Never longer than interval_ms.
    pub watchdog_interval_ms: u64,
    /// Unsquashed record count above which the watchdog squashes a key.
    pub unsquashed_threshold: i64,
    /// Maximum number of keys squashed per pass.
    pub batch_size:           usize,
    /// How long a pass may hold the compaction lease.
    pub lease_ttl_ms:         u64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            interval_ms:          60_000,
            watchdog_interval_ms: 5_000,
            unsquashed_threshold: 500,
            batch_size:           5_000,
            lease_ttl_ms:         7_200_000,
        }
    }
}

impl CompactorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.min(self.interval_ms))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub database:  DatabaseConfig,
    pub compactor: CompactorConfig,
}

impl RollupConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &str) -> RollupResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RollupConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RollupResult<()> {
        if self.database.path.trim().is_empty() {
            return Err(RollupError::Config("database.path must not be empty".into()));
        }
        let c = &self.compactor;
        if c.interval_ms == 0 || c.watchdog_interval_ms == 0 {
            return Err(RollupError::Config("compactor intervals must be positive".into()));
        }
        if c.batch_size == 0 {
            return Err(RollupError::Config("compactor.batch_size must be positive".into()));
        }
        if c.unsquashed_threshold <= 0 {
            return Err(RollupError::Config(
                "compactor.unsquashed_threshold must be positive".into(),
            ));
        }
        if c.lease_ttl_ms == 0 {
            return Err(RollupError::Config("compactor.lease_ttl_ms must be positive".into()));
        }
        Ok(())
    }

    /// Config with fast intervals and an in-memory database, for tests.
    pub fn default_test() -> Self {
        Self {
            database: DatabaseConfig {
                path:            ":memory:".into(),
                busy_timeout_ms: 10_000,
            },
            compactor: CompactorConfig {
                interval_ms:          50,
                watchdog_interval_ms: 10,
                unsquashed_threshold: 10,
                batch_size:           100,
                lease_ttl_ms:         5_000,
            },
        }
    }
}
