//! Append-only revision graph using sled

use crate::snapshot::{Snapshot, SnapshotId, SnapshotMeta};
use chunkline_core::Digest;
use parking_lot::{Mutex, RwLock};
use sled::Db;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A parent passed to `record` was never recorded
    #[error("parent snapshot {0} does not exist")]
    MissingParent(SnapshotId),

    #[error("snapshot {0} not found")]
    NotFound(SnapshotId),

    #[error("invalid graph key of {0} bytes")]
    InvalidKey(usize),

    #[error("no graph entry at sequence {0}")]
    MissingEntry(u64),

    #[error("graph database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("snapshot encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Snapshot arena keyed by append sequence
///
/// Sled stores `seq (big-endian) -> bincode(Snapshot)`; the id -> seq index
/// lives in memory and is rebuilt on open. Parents always carry a lower
/// sequence than their children.
pub struct RevisionGraph {
    db: Db,
    index: RwLock<BTreeMap<SnapshotId, u64>>,
    seq_counter: AtomicU64,
    /// Serializes `record`
    writer: Mutex<()>,
}

fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn parse_key(key: &[u8]) -> Result<u64, GraphError> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| GraphError::InvalidKey(key.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

impl RevisionGraph {
    /// Open or create the graph database in `dir`
    pub fn open(dir: &Path) -> Result<Self, GraphError> {
        let db = sled::open(dir)?;

        let mut index = BTreeMap::new();
        let mut next_seq = 0u64;
        let mut unreadable = 0usize;
        for item in db.iter() {
            let (key, value) = item?;
            let seq = match parse_key(&key) {
                Ok(seq) => seq,
                Err(_) => {
                    unreadable += 1;
                    continue;
                }
            };
            // Never reuse a sequence, even one holding a corrupt entry
            next_seq = next_seq.max(seq.saturating_add(1));
            match Snapshot::deserialize(&value) {
                Ok(snapshot) => {
                    index.insert(snapshot.id, seq);
                }
                Err(_) => unreadable += 1,
            }
        }
        if unreadable > 0 {
            tracing::warn!(unreadable, "revision graph holds undecodable entries; run verify");
        }

        tracing::debug!(snapshots = index.len(), "opened revision graph");
        Ok(Self {
            db,
            index: RwLock::new(index),
            seq_counter: AtomicU64::new(next_seq),
            writer: Mutex::new(()),
        })
    }

    /// Append a snapshot of `tree`; every parent must already be recorded
    pub fn record(
        &self,
        tree: Digest,
        parents: Vec<SnapshotId>,
        meta: SnapshotMeta,
    ) -> Result<Snapshot, GraphError> {
        let _guard = self.writer.lock();

        {
            let index = self.index.read();
            if let Some(missing) = parents.iter().find(|p| !index.contains_key(p)) {
                return Err(GraphError::MissingParent(*missing));
            }
        }

        let snapshot = Snapshot::new(tree, parents, meta);
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        self.db.insert(seq_key(seq), snapshot.serialize()?)?;
        self.db.flush()?;
        self.index.write().insert(snapshot.id, seq);

        tracing::info!(
            snapshot = %snapshot.id,
            tree = %tree.short(),
            parents = snapshot.parents.len(),
            "recorded snapshot"
        );
        Ok(snapshot)
    }

    pub fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>, GraphError> {
        let seq = match self.index.read().get(id) {
            Some(&seq) => seq,
            None => return Ok(None),
        };
        self.load(seq)
    }

    fn load(&self, seq: u64) -> Result<Option<Snapshot>, GraphError> {
        match self.db.get(seq_key(seq))? {
            Some(value) => Ok(Some(Snapshot::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn require(&self, id: &SnapshotId) -> Result<Snapshot, GraphError> {
        self.get(id)?.ok_or(GraphError::NotFound(*id))
    }

    pub fn contains(&self, id: &SnapshotId) -> bool {
        self.index.read().contains_key(id)
    }

    /// Most recently recorded snapshot
    pub fn latest(&self) -> Result<Option<Snapshot>, GraphError> {
        let max_seq = self.index.read().values().max().copied();
        match max_seq {
            Some(seq) => self.load(seq),
            None => Ok(None),
        }
    }

    /// Every decodable snapshot in recording order
    ///
    /// Undecodable entries are skipped; `verify_integrity` reports them.
    pub fn all(&self) -> Result<Vec<Snapshot>, GraphError> {
        let mut snapshots = Vec::with_capacity(self.count());
        for value in self.db.iter().values() {
            match Snapshot::deserialize(&value?) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::debug!("skipping undecodable graph entry: {}", e),
            }
        }
        Ok(snapshots)
    }

    /// Snapshots nobody lists as a parent, newest first
    pub fn heads(&self) -> Result<Vec<Snapshot>, GraphError> {
        let all = self.all()?;
        let parents: HashSet<SnapshotId> = all.iter().flat_map(|s| s.parents.iter().copied()).collect();
        Ok(all.into_iter().rev().filter(|s| !parents.contains(&s.id)).collect())
    }

    /// Snapshots listing `id` as a parent, in recording order
    pub fn children(&self, id: &SnapshotId) -> Result<Vec<Snapshot>, GraphError> {
        if !self.contains(id) {
            return Err(GraphError::NotFound(*id));
        }
        Ok(self
            .all()?
            .into_iter()
            .filter(|s| s.parents.contains(id))
            .collect())
    }

    /// All snapshot ids, sorted
    pub fn ids(&self) -> Vec<SnapshotId> {
        self.index.read().keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    /// `id` followed lazily by its ancestors
    ///
    /// Each snapshot comes before any of its ancestors and appears once.
    pub fn history(&self, id: &SnapshotId) -> Result<History<'_>, GraphError> {
        let seq = *self.index.read().get(id).ok_or(GraphError::NotFound(*id))?;
        let mut queue = BinaryHeap::new();
        queue.push(seq);
        let mut seen = HashSet::new();
        seen.insert(seq);
        Ok(History {
            graph: self,
            queue,
            seen,
        })
    }

    /// Walk first parents `steps` times from `id`
    pub fn first_parent_ancestor(&self, id: &SnapshotId, steps: usize) -> Result<Option<SnapshotId>, GraphError> {
        let mut current = *id;
        for _ in 0..steps {
            match self.require(&current)?.first_parent() {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Scan every stored entry and cross-check it against the index
    ///
    /// Checks that:
    /// 1. Entries decode
    /// 2. Every parent exists and was recorded earlier
    /// 3. Index and database agree
    pub fn verify_integrity(&self) -> Result<IntegrityReport, GraphError> {
        let start = Instant::now();
        let mut report = IntegrityReport::default();
        let index = self.index.read();
        let mut stored = HashSet::new();

        for item in self.db.iter() {
            let (key, value) = item?;
            report.total_entries += 1;

            let seq = match parse_key(&key) {
                Ok(seq) => seq,
                Err(e) => {
                    tracing::warn!("{}", e);
                    report.corrupted_entries.push(key.to_vec());
                    continue;
                }
            };
            let snapshot = match Snapshot::deserialize(&value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(seq, "failed to decode snapshot: {}", e);
                    report.corrupted_entries.push(key.to_vec());
                    continue;
                }
            };
            stored.insert(seq);

            match index.get(&snapshot.id) {
                Some(&indexed) if indexed == seq => {}
                Some(&indexed) => {
                    tracing::warn!(snapshot = %snapshot.id, seq, indexed, "index mismatch");
                    report.index_mismatches.push((snapshot.id, seq, indexed));
                }
                None => {
                    tracing::warn!(snapshot = %snapshot.id, seq, "snapshot missing from index");
                    report.orphaned_entries.push((seq, snapshot.id));
                }
            }

            for parent in &snapshot.parents {
                match index.get(parent) {
                    Some(&parent_seq) if parent_seq < seq => {}
                    _ => {
                        tracing::warn!(snapshot = %snapshot.id, parent = %parent, "dangling parent");
                        report.missing_parents.push((snapshot.id, *parent));
                    }
                }
            }
            report.valid_entries += 1;
        }

        for (&id, &seq) in index.iter() {
            if !stored.contains(&seq) {
                tracing::warn!(snapshot = %id, seq, "index references missing entry");
                report.index_without_db.push((id, seq));
            }
        }

        report.scan_duration = start.elapsed();
        tracing::info!(
            valid = report.valid_entries,
            total = report.total_entries,
            "graph integrity check complete"
        );
        Ok(report)
    }
}

/// Lazy ancestor walk, newest first by recording order
pub struct History<'a> {
    graph: &'a RevisionGraph,
    queue: BinaryHeap<u64>,
    seen: HashSet<u64>,
}

impl Iterator for History<'_> {
    type Item = Result<Snapshot, GraphError>;

    fn next(&mut self) -> Option<Self::Item> {
        let seq = self.queue.pop()?;
        let snapshot = match self.graph.load(seq) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.queue.clear();
                return Some(Err(GraphError::MissingEntry(seq)));
            }
            Err(e) => {
                self.queue.clear();
                return Some(Err(e));
            }
        };

        let index = self.graph.index.read();
        for parent in &snapshot.parents {
            match index.get(parent) {
                Some(&parent_seq) => {
                    if self.seen.insert(parent_seq) {
                        self.queue.push(parent_seq);
                    }
                }
                None => {
                    self.queue.clear();
                    return Some(Err(GraphError::NotFound(*parent)));
                }
            }
        }
        Some(Ok(snapshot))
    }
}

/// Graph integrity report
#[derive(Debug, Default, Clone)]
pub struct IntegrityReport {
    pub total_entries: usize,
    pub valid_entries: usize,
    /// Keys whose entry failed to decode
    pub corrupted_entries: Vec<Vec<u8>>,
    /// In the database but not in the index
    pub orphaned_entries: Vec<(u64, SnapshotId)>,
    /// (snapshot, database seq, index seq)
    pub index_mismatches: Vec<(SnapshotId, u64, u64)>,
    pub index_without_db: Vec<(SnapshotId, u64)>,
    /// (snapshot, parent) pairs where the parent is absent or recorded later
    pub missing_parents: Vec<(SnapshotId, SnapshotId)>,
    pub scan_duration: Duration,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.corrupted_entries.is_empty()
            && self.orphaned_entries.is_empty()
            && self.index_mismatches.is_empty()
            && self.index_without_db.is_empty()
            && self.missing_parents.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.corrupted_entries.len()
            + self.orphaned_entries.len()
            + self.index_mismatches.len()
            + self.index_without_db.len()
            + self.missing_parents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(n: u8) -> Digest {
        Digest::from_bytes([n; 32])
    }

    fn record(graph: &RevisionGraph, n: u8, parents: &[&Snapshot]) -> Snapshot {
        graph
            .record(tree(n), parents.iter().map(|p| p.id).collect(), SnapshotMeta::default())
            .unwrap()
    }

    fn ids(history: History<'_>) -> Vec<SnapshotId> {
        history.map(|s| s.unwrap().id).collect()
    }

    #[test]
    fn test_record_and_get() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        assert!(graph.latest().unwrap().is_none());

        let root = record(&graph, 1, &[]);
        let fetched = graph.get(&root.id).unwrap().unwrap();
        assert_eq!(fetched, root);
        assert!(graph.contains(&root.id));
        assert_eq!(graph.count(), 1);
        assert_eq!(graph.latest().unwrap().unwrap().id, root.id);
    }

    #[test]
    fn test_missing_parent_rejected() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        let stranger = SnapshotId::new();
        let err = graph
            .record(tree(1), vec![stranger], SnapshotMeta::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingParent(id) if id == stranger));
        assert_eq!(graph.count(), 0);
    }

    #[test]
    fn test_history_orders_descendants_first() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let a = record(&graph, 1, &[]);
        let b = record(&graph, 2, &[&a]);
        let c = record(&graph, 3, &[&a]);
        let d = record(&graph, 4, &[&b, &c]);

        let walk = ids(graph.history(&d.id).unwrap());
        assert_eq!(walk.len(), 4);
        assert_eq!(walk[0], d.id);
        assert_eq!(walk[3], a.id);
        assert_eq!(ids(graph.history(&b.id).unwrap()), vec![b.id, a.id]);
    }

    #[test]
    fn test_history_is_lazy() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        let mut last = record(&graph, 0, &[]);
        for n in 1..20 {
            last = record(&graph, n, &[&last]);
        }
        let first_two: Vec<_> = graph.history(&last.id).unwrap().take(2).collect();
        assert_eq!(first_two.len(), 2);
        assert!(matches!(graph.history(&SnapshotId::new()), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn test_heads_and_children() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        let a = record(&graph, 1, &[]);
        let b = record(&graph, 2, &[&a]);
        let c = record(&graph, 3, &[&a]);

        let heads: Vec<_> = graph.heads().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(heads, vec![c.id, b.id]);
        let children: Vec<_> = graph.children(&a.id).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(children, vec![b.id, c.id]);
        assert!(graph.children(&c.id).unwrap().is_empty());
    }

    #[test]
    fn test_first_parent_ancestor() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        let a = record(&graph, 1, &[]);
        let b = record(&graph, 2, &[&a]);
        let c = record(&graph, 3, &[&b]);
        assert_eq!(graph.first_parent_ancestor(&c.id, 0).unwrap(), Some(c.id));
        assert_eq!(graph.first_parent_ancestor(&c.id, 2).unwrap(), Some(a.id));
        assert_eq!(graph.first_parent_ancestor(&c.id, 3).unwrap(), None);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        let (a, b) = {
            let graph = RevisionGraph::open(dir.path()).unwrap();
            let a = record(&graph, 1, &[]);
            let b = record(&graph, 2, &[&a]);
            (a, b)
        };

        let graph = RevisionGraph::open(dir.path()).unwrap();
        assert_eq!(graph.count(), 2);
        assert_eq!(graph.latest().unwrap().unwrap().id, b.id);
        let c = record(&graph, 3, &[&b]);
        assert_eq!(ids(graph.history(&c.id).unwrap()), vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_verify_integrity_healthy() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        let a = record(&graph, 1, &[]);
        record(&graph, 2, &[&a]);

        let report = graph.verify_integrity().unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.valid_entries, 2);
    }

    #[test]
    fn test_verify_integrity_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let graph = RevisionGraph::open(dir.path()).unwrap();
        record(&graph, 1, &[]);
        graph.db.insert(seq_key(99), &b"garbage"[..]).unwrap();

        let report = graph.verify_integrity().unwrap();
        assert!(!report.is_healthy());
        assert_eq!(report.corrupted_entries.len(), 1);
        assert_eq!(report.valid_entries, 1);
    }

    #[test]
    fn test_corrupt_entry_survives_reopen_and_is_reported() {
        let dir = TempDir::new().unwrap();
        let (a, b) = {
            let graph = RevisionGraph::open(dir.path()).unwrap();
            let a = record(&graph, 1, &[]);
            let b = record(&graph, 2, &[&a]);
            graph.db.insert(seq_key(7), &b"garbage"[..]).unwrap();
            graph.db.flush().unwrap();
            (a, b)
        };

        let graph = RevisionGraph::open(dir.path()).unwrap();
        assert_eq!(graph.count(), 2);
        assert_eq!(graph.all().unwrap().len(), 2);
        assert_eq!(ids(graph.history(&b.id).unwrap()), vec![b.id, a.id]);

        let report = graph.verify_integrity().unwrap();
        assert!(!report.is_healthy());
        assert_eq!(report.corrupted_entries, vec![seq_key(7).to_vec()]);
        assert_eq!(report.valid_entries, 2);

        // New records land after the corrupt sequence instead of overwriting it
        let c = record(&graph, 3, &[&b]);
        assert_eq!(graph.index.read()[&c.id], 8);
    }
}
