/*!
Retention policy: which managed snapshots have outlived their retention window.

The newest snapshot of a target always survives, even when it is older than
the window. This keeps at least one restore point when the job has not run
for longer than the retention period.
*/

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::snapshot::{newest_first, Snapshot, SnapshotId};

/// Retention applied when a target does not configure one.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Largest retention a configuration may ask for (one hundred years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

const SECS_PER_DAY: i64 = 86_400;

/// Outcome of evaluating the retention policy over one target's snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Newest snapshot, kept although it is past the cutoff
    pub preserved_expired: Option<SnapshotId>,
    /// Snapshots to delete, newest first
    pub delete: Vec<SnapshotId>,
}

/// Selects expired snapshots for deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicyEngine;

impl RetentionPolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Snapshots created at or before the cutoff are expired. A window reaching
    /// past the earliest representable instant expires nothing.
    pub fn cutoff(retention_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(Duration::seconds(i64::from(retention_days) * SECS_PER_DAY))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn evaluate(
        &self,
        snapshots: &[Snapshot],
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> RetentionPlan {
        let mut sorted: Vec<&Snapshot> = snapshots.iter().collect();
        sorted.sort_by(|a, b| newest_first(a, b));

        let cutoff = Self::cutoff(retention_days, now);
        let mut plan = RetentionPlan::default();

        let mut iter = sorted.into_iter();
        if let Some(newest) = iter.next() {
            if newest.created_at <= cutoff {
                warn!(
                    snapshot_id = %newest.id,
                    created_at = %newest.created_at,
                    retention_days,
                    "All snapshots have expired, preserving the newest one"
                );
                plan.preserved_expired = Some(newest.id.clone());
            }
        }

        for snapshot in iter {
            if snapshot.created_at > cutoff {
                debug!(snapshot_id = %snapshot.id, "Snapshot within retention window");
                continue;
            }
            info!(
                snapshot_id = %snapshot.id,
                created_at = %snapshot.created_at,
                "Snapshot expired"
            );
            plan.delete.push(snapshot.id.clone());
        }

        plan
    }

    /// Identifiers of snapshots that may be deleted. Never includes the newest.
    pub fn snapshots_to_delete(
        &self,
        snapshots: &[Snapshot],
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> BTreeSet<SnapshotId> {
        self.evaluate(snapshots, retention_days, now)
            .delete
            .into_iter()
            .collect()
    }
}
