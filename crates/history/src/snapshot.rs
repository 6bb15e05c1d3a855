//! Snapshot data structures

use chunkline_core::{Digest, Tree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Opaque snapshot key (ULID: creation time + uniqueness)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub Ulid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SnapshotId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// A recorded tree with its place in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// First parent is the mainline
    pub parents: Vec<SnapshotId>,
    pub tree: Digest,
    /// Timestamp (Unix milliseconds)
    pub ts_unix_ms: u64,
    pub meta: SnapshotMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub label: Option<String>,
    /// Task or agent step that produced the tree
    pub task: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub files: u32,
    pub chunks: u32,
}

impl SnapshotMeta {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Fill file and chunk counts from the recorded tree
    pub fn counted(mut self, tree: &Tree) -> Self {
        self.files = tree.len() as u32;
        self.chunks = tree.chunk_count() as u32;
        self
    }
}

impl Snapshot {
    pub fn new(tree: Digest, parents: Vec<SnapshotId>, meta: SnapshotMeta) -> Self {
        Self {
            id: SnapshotId::new(),
            parents,
            tree,
            ts_unix_ms: current_timestamp_ms(),
            meta,
        }
    }

    pub fn first_parent(&self) -> Option<SnapshotId> {
        self.parents.first().copied()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
