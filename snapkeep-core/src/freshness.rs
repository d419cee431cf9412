/*!
Decides whether a target needs a new snapshot on this run.
*/

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::snapshot::Snapshot;

/// Default freshness window: 23h59m, one minute short of a day so that a
/// daily schedule starting slightly early still takes a snapshot.
pub const FRESHNESS_WINDOW_SECS: i64 = 86_340;

/// Suppresses snapshot creation while a recent enough snapshot exists.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessGuard {
    window: Duration,
}

impl FreshnessGuard {
    pub fn new() -> Self {
        Self::with_window(Duration::seconds(FRESHNESS_WINDOW_SECS))
    }

    pub fn with_window(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the first snapshot whose age is within the window.
    ///
    /// The boundary is inclusive, and a snapshot dated in the future counts
    /// as fresh. List order does not matter.
    pub fn find_fresh<'a>(&self, snapshots: &'a [Snapshot], now: DateTime<Utc>) -> Option<&'a Snapshot> {
        snapshots
            .iter()
            .find(|snapshot| now.signed_duration_since(snapshot.created_at) <= self.window)
    }

    /// Whether a new snapshot must be created.
    pub fn should_create(&self, snapshots: &[Snapshot], now: DateTime<Utc>) -> bool {
        match self.find_fresh(snapshots, now) {
            Some(fresh) => {
                info!(
                    snapshot_id = %fresh.id,
                    created_at = %fresh.created_at,
                    "Skipping snapshot creation, fresh snapshot exists"
                );
                false
            }
            None => {
                debug!(
                    checked = snapshots.len(),
                    window_secs = self.window.num_seconds(),
                    "No fresh snapshot found"
                );
                true
            }
        }
    }
}

impl Default for FreshnessGuard {
    fn default() -> Self {
        Self::new()
    }
}
