//! Sync status for display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the most recent push or pull stands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Nothing attempted yet this session
    #[default]
    Idle,
    InFlight,
    Succeeded,
    /// The remote store failed and data went to the local cache
    FailedFallback,
}

/// Snapshot of connectivity and sync state for a status indicator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusInfo {
    pub online: bool,
    pub phase: SyncPhase,
    pub last_sync: Option<DateTime<Utc>>,
    pub seconds_since_sync: Option<u64>,
    pub message: String,
}

impl SyncStatusInfo {
    pub fn new(
        online: bool,
        phase: SyncPhase,
        last_sync: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let seconds_since_sync = last_sync.map(|at| (now - at).num_seconds().max(0) as u64);
        let message = match (online, phase) {
            (false, _) => "Offline - saved locally",
            (true, SyncPhase::InFlight) => "Syncing data to cloud...",
            (true, SyncPhase::Succeeded) => "Data synced to cloud",
            (true, SyncPhase::FailedFallback) => "Sync failed - check internet",
            (true, SyncPhase::Idle) => "Connected",
        }
        .to_string();

        Self {
            online,
            phase,
            last_sync,
            seconds_since_sync,
            message,
        }
    }

    pub fn short_status(&self) -> &'static str {
        if self.online {
            "Online"
        } else {
            "Offline"
        }
    }

    /// Format time since sync for display
    pub fn formatted_time_since_sync(&self) -> Option<String> {
        self.seconds_since_sync.map(|seconds| {
            if seconds < 60 {
                format!("{}s ago", seconds)
            } else if seconds < 3600 {
                format!("{}m ago", seconds / 60)
            } else if seconds < 86400 {
                format!("{}h ago", seconds / 3600)
            } else {
                format!("{}d ago", seconds / 86400)
            }
        })
    }
}
