//! Lineage reports and their filtered views

use chunkline_core::{Digest, Range};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Where a chunk lives in one tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkLocation {
    pub path: String,
    /// Canonical index within the file
    pub index: usize,
    pub range: Range,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl ChunkLocation {
    fn covers(&self, path: &str, offset: u64) -> bool {
        self.path == path && self.range.contains_offset(offset)
    }

    fn sort_key(&self) -> (&str, usize) {
        (&self.path, self.index)
    }
}

impl fmt::Display for ChunkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.range)?;
        if let Some(symbol) = &self.symbol {
            write!(f, " ({})", symbol)?;
        }
        Ok(())
    }
}

/// The relationship of one chunk between two trees
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lineage {
    Unchanged {
        from: ChunkLocation,
        to: ChunkLocation,
    },
    Moved {
        from: ChunkLocation,
        to: ChunkLocation,
    },
    Duplicated {
        from: ChunkLocation,
        to: Vec<ChunkLocation>,
    },
    Modified {
        from: ChunkLocation,
        to: ChunkLocation,
        score: f64,
    },
    Split {
        from: ChunkLocation,
        to: Vec<ChunkLocation>,
        coverage: f64,
    },
    Removed {
        from: ChunkLocation,
    },
    Added {
        to: ChunkLocation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineageKind {
    Unchanged,
    Moved,
    Duplicated,
    Modified,
    Split,
    Removed,
    Added,
}

impl LineageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LineageKind::Unchanged => "unchanged",
            LineageKind::Moved => "moved",
            LineageKind::Duplicated => "duplicated",
            LineageKind::Modified => "modified",
            LineageKind::Split => "split",
            LineageKind::Removed => "removed",
            LineageKind::Added => "added",
        }
    }
}

impl fmt::Display for LineageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lineage {
    pub fn kind(&self) -> LineageKind {
        match self {
            Lineage::Unchanged { .. } => LineageKind::Unchanged,
            Lineage::Moved { .. } => LineageKind::Moved,
            Lineage::Duplicated { .. } => LineageKind::Duplicated,
            Lineage::Modified { .. } => LineageKind::Modified,
            Lineage::Split { .. } => LineageKind::Split,
            Lineage::Removed { .. } => LineageKind::Removed,
            Lineage::Added { .. } => LineageKind::Added,
        }
    }

    /// The old-side chunk, absent for `Added`
    pub fn source(&self) -> Option<&ChunkLocation> {
        match self {
            Lineage::Unchanged { from, .. }
            | Lineage::Moved { from, .. }
            | Lineage::Duplicated { from, .. }
            | Lineage::Modified { from, .. }
            | Lineage::Split { from, .. }
            | Lineage::Removed { from } => Some(from),
            Lineage::Added { .. } => None,
        }
    }

    /// New-side chunks this entry points at
    pub fn targets(&self) -> Vec<&ChunkLocation> {
        match self {
            Lineage::Unchanged { to, .. }
            | Lineage::Moved { to, .. }
            | Lineage::Modified { to, .. }
            | Lineage::Added { to } => vec![to],
            Lineage::Duplicated { to, .. } | Lineage::Split { to, .. } => to.iter().collect(),
            Lineage::Removed { .. } => Vec::new(),
        }
    }

    fn order(&self, other: &Lineage) -> Ordering {
        match (self.source(), other.source()) {
            (Some(a), Some(b)) => a.sort_key().cmp(&b.sort_key()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => {
                let a = self.targets().first().map(|t| t.sort_key());
                let b = other.targets().first().map(|t| t.sort_key());
                a.cmp(&b)
            }
        }
    }
}

/// Per-kind counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub unchanged: usize,
    pub moved: usize,
    pub duplicated: usize,
    pub modified: usize,
    pub split: usize,
    pub removed: usize,
    pub added: usize,
}

impl Summary {
    pub fn count(&self, kind: LineageKind) -> usize {
        match kind {
            LineageKind::Unchanged => self.unchanged,
            LineageKind::Moved => self.moved,
            LineageKind::Duplicated => self.duplicated,
            LineageKind::Modified => self.modified,
            LineageKind::Split => self.split,
            LineageKind::Removed => self.removed,
            LineageKind::Added => self.added,
        }
    }

    pub fn changes(&self) -> usize {
        self.moved + self.duplicated + self.modified + self.split + self.removed + self.added
    }
}

/// Classified relationship of every chunk between two trees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageReport {
    #[serde(serialize_with = "hex")]
    pub old_tree: Digest,
    #[serde(serialize_with = "hex")]
    pub new_tree: Digest,
    /// Old-side entries by (path, index), then additions by (path, index)
    pub entries: Vec<Lineage>,
}

fn hex<S: Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&digest.to_hex())
}

impl LineageReport {
    pub fn new(old_tree: Digest, new_tree: Digest, mut entries: Vec<Lineage>) -> Self {
        entries.sort_by(|a, b| a.order(b));
        Self {
            old_tree,
            new_tree,
            entries,
        }
    }

    /// Entries other than `Unchanged`
    pub fn changes(&self) -> impl Iterator<Item = &Lineage> {
        self.entries
            .iter()
            .filter(|entry| entry.kind() != LineageKind::Unchanged)
    }

    pub fn of_kind(&self, kind: LineageKind) -> impl Iterator<Item = &Lineage> {
        self.entries.iter().filter(move |entry| entry.kind() == kind)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            let slot = match entry.kind() {
                LineageKind::Unchanged => &mut summary.unchanged,
                LineageKind::Moved => &mut summary.moved,
                LineageKind::Duplicated => &mut summary.duplicated,
                LineageKind::Modified => &mut summary.modified,
                LineageKind::Split => &mut summary.split,
                LineageKind::Removed => &mut summary.removed,
                LineageKind::Added => &mut summary.added,
            };
            *slot += 1;
        }
        summary
    }

    /// Entries touching the chunk at `path` and byte `offset`, on either side
    ///
    /// "Where did this come from" finds the entries targeting it; "where did
    /// it go" finds the entry originating from it.
    pub fn trace(&self, path: &str, offset: u64) -> Vec<&Lineage> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.source().is_some_and(|from| from.covers(path, offset))
                    || entry.targets().iter().any(|to| to.covers(path, offset))
            })
            .collect()
    }

    /// The entry originating from an old-side chunk
    pub fn origin_of(&self, path: &str, index: usize) -> Option<&Lineage> {
        self.entries
            .iter()
            .find(|entry| entry.source().is_some_and(|from| from.path == path && from.index == index))
    }

    pub fn is_unchanged(&self) -> bool {
        self.changes().next().is_none()
    }
}
