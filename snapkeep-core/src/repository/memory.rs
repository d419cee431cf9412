/*!
In-memory snapshot repository.
*/

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{RepositoryProvider, SnapshotRepository};
use crate::config::BackupTarget;
use crate::snapshot::{Snapshot, SnapshotId, Tag, TagSet};
use crate::{Result, SnapkeepError};

#[derive(Debug, Default)]
struct State {
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    fixed_now: Option<DateTime<Utc>>,
    failing: Vec<&'static str>,
    calls: Vec<String>,
}

/// Snapshot repository held entirely in memory
///
/// Clones share the same state, so a clone can be handed to the orchestrator
/// while the original is kept for inspection. Snapshot ids look like
/// `snap-<uuid>`.
///
/// # Example
/// ```rust
/// use snapkeep_core::repository::{MemorySnapshotRepository, SnapshotRepository};
///
/// let repo = MemorySnapshotRepository::new();
/// let snapshot = repo.create_snapshot("vol-1", "nightly")?;
/// assert!(snapshot.id.as_str().starts_with("snap-"));
/// # Ok::<(), snapkeep_core::SnapkeepError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotRepository {
    state: Arc<Mutex<State>>,
}

impl MemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp created snapshots with `now` instead of the wall clock.
    pub fn with_fixed_time(self, now: DateTime<Utc>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fixed_now = Some(now);
        }
        self
    }

    /// Seed an existing snapshot.
    pub fn insert(&self, snapshot: Snapshot) -> Result<()> {
        let mut state = self.lock("insert")?;
        state.snapshots.insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    /// Make every later call of `operation` fail with a repository error.
    pub fn fail_on(&self, operation: &'static str) -> Result<()> {
        self.lock("fail_on")?.failing.push(operation);
        Ok(())
    }

    /// All stored snapshots in id order.
    pub fn snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.lock("snapshots")?.snapshots.values().cloned().collect())
    }

    pub fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        Ok(self.lock("get")?.snapshots.get(id).cloned())
    }

    /// Calls made so far, as `operation:argument`.
    pub fn calls(&self) -> Result<Vec<String>> {
        Ok(self.lock("calls")?.calls.clone())
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| SnapkeepError::repository(operation, "memory repository lock poisoned"))
    }

    fn begin(&self, operation: &'static str, argument: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock(operation)?;
        state.calls.push(format!("{operation}:{argument}"));
        if state.failing.contains(&operation) {
            return Err(SnapkeepError::repository(operation, "injected failure"));
        }
        Ok(state)
    }
}

impl SnapshotRepository for MemorySnapshotRepository {
    fn list_snapshots(&self, volume_id: &str, tag_filter: &Tag) -> Result<Vec<Snapshot>> {
        let state = self.begin("list_snapshots", volume_id)?;
        let found: Vec<Snapshot> = state
            .snapshots
            .values()
            .filter(|s| s.volume_id == volume_id)
            .filter(|s| s.tags.get(&tag_filter.key) == Some(tag_filter.value.as_str()))
            .cloned()
            .collect();
        debug!(volume_id, count = found.len(), "Listed snapshots from memory");
        Ok(found)
    }

    fn create_snapshot(&self, volume_id: &str, _description: &str) -> Result<Snapshot> {
        let mut state = self.begin("create_snapshot", volume_id)?;
        let created_at = state.fixed_now.unwrap_or_else(Utc::now);
        let id = format!("snap-{}", Uuid::new_v4().simple());
        let snapshot = Snapshot::new(id, volume_id, created_at);
        state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn create_tags(&self, resource_id: &SnapshotId, tags: &TagSet) -> Result<()> {
        let mut state = self.begin("create_tags", resource_id.as_str())?;
        let snapshot = state.snapshots.get_mut(resource_id).ok_or_else(|| {
            SnapkeepError::repository("create_tags", format!("snapshot {resource_id} does not exist"))
        })?;
        snapshot.tags.extend(tags);
        Ok(())
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        let mut state = self.begin("delete_snapshot", snapshot_id.as_str())?;
        match state.snapshots.remove(snapshot_id) {
            Some(_) => Ok(()),
            None => Err(SnapkeepError::SnapshotNotFound(snapshot_id.to_string())),
        }
    }
}

impl RepositoryProvider for MemorySnapshotRepository {
    fn open(&self, _target: &BackupTarget) -> Result<Box<dyn SnapshotRepository>> {
        Ok(Box::new(self.clone()))
    }
}
