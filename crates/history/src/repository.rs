//! Repository facade: store, revision graph and config behind one handle

use crate::config::ProjectConfig;
use crate::graph::{IntegrityReport, RevisionGraph};
use crate::snapshot::{Snapshot, SnapshotId, SnapshotMeta};
use anyhow::{Context, Result};
use chunkline_core::store::{atomic_write, STORE_DIR};
use chunkline_core::{ContentStore, MemoryStore, ScanReport, Scanner, Store, Tree, ValidationError};
use chunkline_lineage::{Lineage, LineageEngine, LineageReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HEAD_FILE: &str = "HEAD";
const MIN_PREFIX: usize = 4;

pub struct Repository {
    store: Store,
    graph: RevisionGraph,
    config: ProjectConfig,
    engine: LineageEngine,
}

/// Outcome of recording the working tree
#[derive(Debug)]
pub struct Recorded {
    pub snapshot: Snapshot,
    /// Files left out of the tree, with the reason
    pub excluded: Vec<(String, ValidationError)>,
    pub bytes: u64,
}

/// Outcome of `Repository::verify`
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub graph: IntegrityReport,
    /// Snapshots whose tree could not be loaded
    pub broken_trees: Vec<(SnapshotId, String)>,
    pub trees_checked: usize,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.graph.is_healthy() && self.broken_trees.is_empty()
    }
}

impl Repository {
    /// Create `.chunkline/` at `root` with a default config
    pub fn init(root: &Path) -> Result<Self> {
        let defaults = ProjectConfig::default();
        let store = Store::init(root, &defaults.store, defaults.fingerprint)?;
        let config = ProjectConfig::write_default(store.dir())?;
        Self::assemble(store, config)
    }

    pub fn open(root: &Path) -> Result<Self> {
        let config = ProjectConfig::load(&root.join(STORE_DIR))?;
        let store = Store::open(root, &config.store, config.fingerprint)?;
        Self::assemble(store, config)
    }

    /// Open the repository containing `start` or one of its ancestors
    pub fn discover(start: &Path) -> Result<Self> {
        let root = find_root(start)
            .ok_or_else(|| anyhow::anyhow!("Not a chunkline repository (or any parent): {}", start.display()))?;
        Self::open(&root)
    }

    fn assemble(store: Store, config: ProjectConfig) -> Result<Self> {
        let graph = RevisionGraph::open(&store.dir().join("graph"))
            .context("Failed to open revision graph")?;
        let engine = LineageEngine::new(config.lineage.clone());
        Ok(Self {
            store,
            graph,
            config,
            engine,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Scan the working tree, ingesting chunk bytes into the blob store
    pub fn scan(&self) -> Result<ScanReport> {
        self.scan_into(self.store.blob_store())
    }

    fn scan_into(&self, blobs: &dyn ContentStore) -> Result<ScanReport> {
        Scanner::new(self.config.scan.clone(), self.config.fingerprint).scan(self.store.root(), blobs)
    }

    /// Scan and record the working tree
    ///
    /// Without explicit parents the snapshot extends HEAD (if any).
    pub fn record_scan(&self, meta: SnapshotMeta, parents: Option<Vec<SnapshotId>>) -> Result<Recorded> {
        let report = self.scan()?;
        let parents = match parents {
            Some(parents) => parents,
            None => self.head()?.into_iter().collect(),
        };
        let snapshot = self.record_tree(&report.tree, parents, meta)?;
        Ok(Recorded {
            snapshot,
            excluded: report.excluded,
            bytes: report.bytes,
        })
    }

    /// Store `tree` and record it as a new snapshot, moving HEAD to it
    pub fn record_tree(&self, tree: &Tree, parents: Vec<SnapshotId>, meta: SnapshotMeta) -> Result<Snapshot> {
        let digest = self.store.write_tree(tree)?;
        let snapshot = self.graph.record(digest, parents, meta.counted(tree))?;
        self.set_head(&snapshot.id)?;
        Ok(snapshot)
    }

    /// Latest recorded snapshot, `None` before the first record
    pub fn head(&self) -> Result<Option<SnapshotId>> {
        let path = self.head_path();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let id = content
            .parse()
            .with_context(|| format!("Corrupt HEAD: {}", content))?;
        Ok(Some(id))
    }

    fn set_head(&self, id: &SnapshotId) -> Result<()> {
        atomic_write(
            &self.store.dir().join("tmp").join("ingest"),
            &self.head_path(),
            id.to_string().as_bytes(),
        )
    }

    fn head_path(&self) -> PathBuf {
        self.store.dir().join(HEAD_FILE)
    }

    pub fn snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        self.graph
            .get(id)?
            .ok_or_else(|| anyhow::anyhow!("Snapshot not found: {}", id))
    }

    pub fn tree_of(&self, snapshot: &Snapshot) -> Result<Arc<Tree>> {
        self.store
            .read_tree(&snapshot.tree)
            .with_context(|| format!("Failed to load tree of snapshot {}", snapshot.id))
    }

    /// Lineage of every chunk from snapshot `a` to snapshot `b`
    pub fn diff(&self, a: &SnapshotId, b: &SnapshotId) -> Result<LineageReport> {
        let old = self.tree_of(&self.snapshot(a)?)?;
        let new = self.tree_of(&self.snapshot(b)?)?;
        Ok(self.engine.diff_trees(old, new))
    }

    /// Lineage from snapshot `a` to the current working tree
    ///
    /// The working tree is chunked into memory; nothing is written to the store.
    pub fn diff_working(&self, a: &SnapshotId) -> Result<LineageReport> {
        let old = self.tree_of(&self.snapshot(a)?)?;
        let report = self.scan_into(&MemoryStore::new())?;
        Ok(self.engine.diff_trees(old, Arc::new(report.tree)))
    }

    /// Entries touching the chunk at `path`/`offset` between `a` and `b`
    pub fn trace(&self, a: &SnapshotId, b: &SnapshotId, path: &str, offset: u64) -> Result<Vec<Lineage>> {
        let report = self.diff(a, b)?;
        Ok(report.trace(path, offset).into_iter().cloned().collect())
    }

    /// Resolve a snapshot reference
    ///
    /// Accepts a full ULID, a unique prefix of at least four characters,
    /// `HEAD` and `HEAD~N` (first-parent walk).
    pub fn resolve(&self, reference: &str) -> Result<SnapshotId> {
        if let Some(rest) = reference.strip_prefix("HEAD") {
            let head = self
                .head()?
                .ok_or_else(|| anyhow::anyhow!("No snapshots recorded yet"))?;
            let steps = match rest {
                "" => 0,
                _ => rest
                    .strip_prefix('~')
                    .and_then(|n| if n.is_empty() { Some(1) } else { n.parse().ok() })
                    .ok_or_else(|| anyhow::anyhow!("Invalid reference: {}", reference))?,
            };
            return self
                .graph
                .first_parent_ancestor(&head, steps)?
                .ok_or_else(|| anyhow::anyhow!("{} goes past the first snapshot", reference));
        }

        if let Ok(id) = reference.parse::<SnapshotId>() {
            if self.graph.contains(&id) {
                return Ok(id);
            }
        }

        if reference.len() < MIN_PREFIX {
            anyhow::bail!("Snapshot prefix must be at least {} characters: {}", MIN_PREFIX, reference);
        }
        let prefix = reference.to_ascii_uppercase();
        let matches: Vec<SnapshotId> = self
            .graph
            .ids()
            .into_iter()
            .filter(|id| id.to_string().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => anyhow::bail!("Snapshot not found: {}", reference),
            _ => anyhow::bail!("Ambiguous snapshot prefix {} ({} matches)", reference, matches.len()),
        }
    }

    /// Check the graph and that every snapshot's tree loads
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport {
            graph: self.graph.verify_integrity()?,
            ..Default::default()
        };
        for snapshot in self.graph.all()? {
            report.trees_checked += 1;
            if let Err(e) = self.store.read_tree(&snapshot.tree) {
                tracing::warn!(snapshot = %snapshot.id, "tree failed to load: {:#}", e);
                report.broken_trees.push((snapshot.id, format!("{:#}", e)));
            }
        }
        Ok(report)
    }
}

/// Nearest directory at or above `start` holding `.chunkline/`
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STORE_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_init_writes_config_and_empty_head() {
        let (dir, repo) = repo();
        assert!(dir.path().join(".chunkline/config.toml").exists());
        assert!(repo.head().unwrap().is_none());
        assert!(Repository::init(dir.path()).is_err());
    }

    #[test]
    fn test_record_scan_chains_from_head() {
        let (dir, repo) = repo();
        fs::write(dir.path().join("a.txt"), "one\n\ntwo\n").unwrap();
        let first = repo.record_scan(SnapshotMeta::default().with_label("first"), None).unwrap();
        assert!(first.snapshot.parents.is_empty());
        assert_eq!(first.snapshot.meta.files, 1);
        assert_eq!(first.snapshot.meta.chunks, 2);

        fs::write(dir.path().join("b.txt"), "three\n").unwrap();
        let second = repo.record_scan(SnapshotMeta::default(), None).unwrap();
        assert_eq!(second.snapshot.parents, vec![first.snapshot.id]);
        assert_eq!(repo.head().unwrap(), Some(second.snapshot.id));
    }

    #[test]
    fn test_resolve_references() {
        let (dir, repo) = repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let first = repo.record_scan(SnapshotMeta::default(), None).unwrap().snapshot;
        fs::write(dir.path().join("a.txt"), "two\n").unwrap();
        let second = repo.record_scan(SnapshotMeta::default(), None).unwrap().snapshot;

        assert_eq!(repo.resolve("HEAD").unwrap(), second.id);
        assert_eq!(repo.resolve("HEAD~1").unwrap(), first.id);
        assert_eq!(repo.resolve("HEAD~").unwrap(), first.id);
        assert!(repo.resolve("HEAD~2").is_err());
        assert_eq!(repo.resolve(&first.id.to_string()).unwrap(), first.id);

        // 16 characters cover the ULID timestamp plus some randomness
        let prefix = first.id.to_string()[..16].to_ascii_lowercase();
        assert_eq!(repo.resolve(&prefix).unwrap(), first.id);
        assert!(repo.resolve("01").is_err());
        assert!(repo.resolve("ZZZZZZZZ").is_err());
    }

    #[test]
    fn test_diff_working_sees_edits() {
        let (dir, repo) = repo();
        fs::write(dir.path().join("a.txt"), "alpha\n\nbeta\n").unwrap();
        let base = repo.record_scan(SnapshotMeta::default(), None).unwrap().snapshot;

        let clean = repo.diff_working(&base.id).unwrap();
        assert!(clean.is_unchanged());

        fs::write(dir.path().join("b.txt"), "gamma\n").unwrap();
        let report = repo.diff_working(&base.id).unwrap();
        let summary = report.summary();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.unchanged, 2);
    }

    fn blob_count(root: &Path) -> usize {
        walkdir::WalkDir::new(root.join(".chunkline/objects/blobs"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_diff_working_leaves_store_untouched() {
        let (dir, repo) = repo();
        fs::write(dir.path().join("a.txt"), "stored once
").unwrap();
        let base = repo.record_scan(SnapshotMeta::default(), None).unwrap().snapshot;
        let before = blob_count(dir.path());
        assert!(before > 0);

        fs::write(dir.path().join("b.txt"), "only in the working tree
").unwrap();
        let report = repo.diff_working(&base.id).unwrap();
        assert_eq!(report.summary().added, 1);
        assert_eq!(blob_count(dir.path()), before);
    }

    #[test]
    fn test_open_after_reopen_keeps_history() {
        let (dir, repo) = repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let recorded = repo.record_scan(SnapshotMeta::default(), None).unwrap().snapshot;
        drop(repo);

        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let repo = Repository::discover(&nested).unwrap();
        assert_eq!(repo.head().unwrap(), Some(recorded.id));
        assert!(repo.verify().unwrap().is_healthy());
    }
}
