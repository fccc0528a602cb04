use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use turnover_store::StoreConfig;

use crate::error::ReconcileError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Longest the worker sleeps between passes without a wake signal.
    pub poll_interval_ms: u64,
    /// Affected-analysis batch size at which per-id forwarding gives way to a
    /// requery signal.
    pub requery_threshold: usize,
    /// Bound on the wait for the workspace write lock during a merge.
    pub write_lock_timeout_ms: u64,
    /// Re-run the race check while holding the write lock, closing the window
    /// between the check and the merge.
    pub strict_race_check: bool,
}

impl ReconcilerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            requery_threshold: 100,
            write_lock_timeout_ms: 30_000,
            strict_race_check: false,
        }
    }
}

/// Top-level configuration file: `{ "store": {...}, "reconciler": {...} }`.
/// Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnoverConfig {
    pub store: StoreConfig,
    pub reconciler: ReconcilerConfig,
}

impl TurnoverConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        let text = fs::read_to_string(path).map_err(|source| ReconcileError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| ReconcileError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
