/*!
Snapshot and tag model shared by the decision components and the repositories.
*/

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Tag key holding the human-readable snapshot name.
pub const NAME_TAG: &str = "Name";

/// Tag key marking snapshots managed by Snapkeep.
pub const BACKUP_TAG: &str = "Backup";

/// Value of [`BACKUP_TAG`] on managed snapshots.
pub const BACKUP_TAG_VALUE: &str = "true";

/// Repository-assigned snapshot identifier (e.g. `snap-0abc...`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A single key/value tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Set of tags with unique keys. Inserting an existing key replaces its value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: Tag) {
        self.0.insert(tag.key, tag.value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        self.0.iter().map(|(k, v)| Tag::new(k.as_str(), v.as_str()))
    }

    /// Add every tag of `other`, replacing values of keys present in both.
    pub fn extend(&mut self, other: &TagSet) {
        for tag in other.iter() {
            self.insert(tag);
        }
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// A point-in-time copy of a volume.
///
/// Only `tags` may change after creation, and only by adding tags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub volume_id: String,
    /// Creation instant, truncated to whole seconds
    pub created_at: DateTime<Utc>,
    pub tags: TagSet,
}

impl Snapshot {
    pub fn new<I, V>(id: I, volume_id: V, created_at: DateTime<Utc>) -> Self
    where
        I: Into<SnapshotId>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            volume_id: volume_id.into(),
            created_at: created_at.trunc_subsecs(0),
            tags: TagSet::new(),
        }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags.extend(&tags);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG)
    }

    pub fn is_managed(&self) -> bool {
        self.tags.get(BACKUP_TAG) == Some(BACKUP_TAG_VALUE)
    }
}

impl From<String> for SnapshotId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Orders snapshots newest first by creation time.
///
/// Snapshots with equal timestamps compare equal; their relative order after
/// sorting is unspecified and must not be relied upon.
pub fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
    b.created_at.cmp(&a.created_at)
}
