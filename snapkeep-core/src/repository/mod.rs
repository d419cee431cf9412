/*!
Snapshot repository port and adapters.

The decision components never talk to a storage API directly. The orchestrator
issues every list/create/tag/delete call through [`SnapshotRepository`], which
lets the EC2 backend and the in-memory backend be swapped freely.
*/

#[cfg(feature = "ec2")]
pub mod ec2;
pub mod memory;

use crate::config::BackupTarget;
use crate::snapshot::{Snapshot, SnapshotId, Tag, TagSet};
use crate::Result;

/// Remote capability to manage the snapshots of a volume.
///
/// All calls are blocking and are issued one at a time.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotRepository {
    /// List snapshots of `volume_id` carrying the `tag_filter` tag
    ///
    /// # Arguments
    /// * `volume_id` - The volume whose snapshots are listed
    /// * `tag_filter` - Only snapshots with this exact key/value are returned
    fn list_snapshots(&self, volume_id: &str, tag_filter: &Tag) -> Result<Vec<Snapshot>>;

    /// Start a new snapshot of `volume_id`
    ///
    /// # Returns
    /// The created snapshot, without tags
    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<Snapshot>;

    /// Add `tags` to the resource, replacing values of existing keys
    fn create_tags(&self, resource_id: &SnapshotId, tags: &TagSet) -> Result<()>;

    /// Delete a snapshot
    ///
    /// Deleting a snapshot that no longer exists returns
    /// [`crate::SnapkeepError::SnapshotNotFound`].
    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()>;
}

impl<R: SnapshotRepository + ?Sized> SnapshotRepository for Box<R> {
    fn list_snapshots(&self, volume_id: &str, tag_filter: &Tag) -> Result<Vec<Snapshot>> {
        (**self).list_snapshots(volume_id, tag_filter)
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<Snapshot> {
        (**self).create_snapshot(volume_id, description)
    }

    fn create_tags(&self, resource_id: &SnapshotId, tags: &TagSet) -> Result<()> {
        (**self).create_tags(resource_id, tags)
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        (**self).delete_snapshot(snapshot_id)
    }
}

/// Opens a repository bound to one target's credentials and region.
pub trait RepositoryProvider {
    fn open(&self, target: &BackupTarget) -> Result<Box<dyn SnapshotRepository>>;
}

// Re-export types for convenience
#[cfg(feature = "ec2")]
pub use ec2::{Ec2RepositoryProvider, Ec2SnapshotRepository};
pub use memory::MemorySnapshotRepository;
