/*!
Naming convention for snapshots created by Snapkeep.
*/

use crate::snapshot::{Snapshot, Tag, TagSet, BACKUP_TAG, BACKUP_TAG_VALUE, NAME_TAG};

/// Timestamp layout of the `Name` tag suffix: two-digit year, minutes precision.
pub const NAME_TIMESTAMP_FORMAT: &str = "%y%m%d%H%M";

/// Computes the tags applied to a freshly created snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggingScheme;

impl TaggingScheme {
    pub fn new() -> Self {
        Self
    }

    /// `<target>_<yyMMddHHmm>` in UTC.
    pub fn snapshot_name(&self, target_name: &str, snapshot: &Snapshot) -> String {
        format!(
            "{}_{}",
            target_name,
            snapshot.created_at.format(NAME_TIMESTAMP_FORMAT)
        )
    }

    /// Exactly two tags: `Name` and `Backup=true`.
    pub fn compute_tags(&self, target_name: &str, snapshot: &Snapshot) -> TagSet {
        [
            Tag::new(NAME_TAG, self.snapshot_name(target_name, snapshot)),
            Tag::new(BACKUP_TAG, BACKUP_TAG_VALUE),
        ]
        .into_iter()
        .collect()
    }
}
