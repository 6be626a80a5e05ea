//! Construction-time configuration for the profile manager.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`ProfileManager`](crate::ProfileManager).
///
/// Fixed once the manager starts. Missing fields deserialize to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Delete local profiles that disappeared from the remote store.
    pub mirrors_remote_repository: bool,
    /// Quiet period before a search query is applied (ms).
    pub search_debounce_ms: u64,
    /// Pause after a reconciliation pass before it counts as settled (ms).
    pub settle_delay_ms: u64,
    /// Events buffered per subscriber before slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mirrors_remote_repository: false,
            search_debounce_ms: 200,
            settle_delay_ms: 100,
            event_capacity: 64,
        }
    }
}

impl ManagerConfig {
    /// Search debounce window.
    #[must_use]
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// Settle delay after each reconciliation pass.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Parses a JSON configuration document.
    pub fn from_json(bytes: &[u8]) -> SyncResult<Self> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the manager cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
