//! Parallel scanning of a project directory into a tree

use crate::backend::{extract_or_fallback, Backend, BackendKind};
use crate::blob::ContentStore;
use crate::error::ValidationError;
use crate::file::{File, FileMeta};
use crate::fingerprint::FingerprintConfig;
use crate::store::{normalize_path, should_ignore};
use crate::symbol::Symbol;
use crate::tree::{Tree, TreeBuilder};
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Files at or above this size are memory-mapped instead of read
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// `[scan]` section of the project config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub backend: BackendKind,
    /// Path prefixes to skip, relative to the project root
    pub ignore: Vec<String>,
    /// Worker threads for extraction (0 = rayon default)
    pub threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            ignore: vec!["target".to_string()],
            threads: 0,
        }
    }
}

/// Result of a scan: the tree plus every file left out of it
#[derive(Debug)]
pub struct ScanReport {
    pub tree: Tree,
    /// Files rejected by validation, in path order
    pub excluded: Vec<(String, ValidationError)>,
    /// Total bytes read
    pub bytes: u64,
}

enum Outcome {
    Built(File, Vec<Symbol>),
    Excluded(String, ValidationError),
}

enum Content {
    Mapped(Mmap),
    Read(Vec<u8>),
}

impl AsRef<[u8]> for Content {
    fn as_ref(&self) -> &[u8] {
        match self {
            Content::Mapped(map) => map,
            Content::Read(bytes) => bytes,
        }
    }
}

struct Entry {
    path: String,
    abs: PathBuf,
    meta: FileMeta,
    len: u64,
}

/// Turns file contents into a validated tree
///
/// Top-level chunk bytes go into the content store as files are ingested,
/// so the resulting tree can always be materialized from that store.
pub struct Scanner {
    backend: Box<dyn Backend>,
    config: ScanConfig,
    fingerprint: FingerprintConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig, fingerprint: FingerprintConfig) -> Self {
        Self {
            backend: config.backend.backend(),
            config,
            fingerprint,
        }
    }

    /// Replace the configured backend, e.g. with a language-specific extractor
    pub fn with_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    /// Walk `root` and build a tree from every regular file not ignored
    pub fn scan(&self, root: &Path, store: &dyn ContentStore) -> Result<ScanReport> {
        let started = Instant::now();
        let (entries, mut excluded) = self.walk(root)?;
        tracing::info!(root = %root.display(), files = entries.len(), backend = self.backend.name(), "scanning");

        let bytes: u64 = entries.iter().map(|entry| entry.len).sum();
        let outcomes = self.in_pool(|| {
            entries
                .par_iter()
                .map(|entry| {
                    let content = read_content(&entry.abs, entry.len)?;
                    self.ingest(&entry.path, entry.meta, content.as_ref(), store)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut report = self.assemble(outcomes);
        excluded.append(&mut report.excluded);
        excluded.sort_by(|(a, _), (b, _)| a.cmp(b));
        report.excluded = excluded;
        report.bytes = bytes;

        tracing::info!(
            files = report.tree.len(),
            chunks = report.tree.chunk_count(),
            excluded = report.excluded.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );
        Ok(report)
    }

    /// Build a tree from in-memory files `(path, meta, content)`
    pub fn scan_files<P: AsRef<str> + Sync, C: AsRef<[u8]> + Sync>(
        &self,
        files: &[(P, FileMeta, C)],
        store: &dyn ContentStore,
    ) -> Result<ScanReport> {
        let outcomes = self.in_pool(|| {
            files
                .par_iter()
                .map(|(path, meta, content)| self.ingest(path.as_ref(), *meta, content.as_ref(), store))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut report = self.assemble(outcomes);
        report.bytes = files.iter().map(|(_, _, c)| c.as_ref().len() as u64).sum();
        Ok(report)
    }

    fn ingest(&self, path: &str, meta: FileMeta, content: &[u8], store: &dyn ContentStore) -> Result<Outcome> {
        let extraction = extract_or_fallback(self.backend.as_ref(), content, path);
        let (file, symbols) = match File::build(path, meta, content, extraction, &self.fingerprint) {
            Ok(built) => built,
            Err(err) => return Ok(Outcome::Excluded(path.to_string(), err)),
        };

        for chunk in file.top_level() {
            let slice = &content[chunk.range.start() as usize..chunk.range.end() as usize];
            store
                .put(slice)
                .with_context(|| format!("Failed to store content of {}", path))?;
        }
        Ok(Outcome::Built(file, symbols))
    }

    fn assemble(&self, outcomes: Vec<Outcome>) -> ScanReport {
        let mut builder = TreeBuilder::new();
        let mut excluded = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Built(file, symbols) => builder.add(file, symbols),
                Outcome::Excluded(path, err) => {
                    tracing::warn!(path = %path, error = %err, "excluding file with invalid chunks");
                    excluded.push((path, err));
                }
            }
        }

        let (tree, mut conflicts) = builder.build();
        excluded.append(&mut conflicts);
        excluded.sort_by(|(a, _), (b, _)| a.cmp(b));
        ScanReport {
            tree,
            excluded,
            bytes: 0,
        }
    }

    fn walk(&self, root: &Path) -> Result<(Vec<Entry>, Vec<(String, ValidationError)>)> {
        let mut entries = Vec::new();
        let mut excluded = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                match entry.path().strip_prefix(root) {
                    Ok(rel) if rel.as_os_str().is_empty() => true,
                    Ok(rel) => match normalize_path(rel) {
                        Ok(path) => !should_ignore(&path, &self.config.ignore),
                        // Reported below when the entry is a file
                        Err(_) => true,
                    },
                    Err(_) => false,
                }
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root)?;
            let path = match normalize_path(rel) {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(path = %rel.display(), error = %err, "skipping unrepresentable path");
                    excluded.push((rel.display().to_string(), err));
                    continue;
                }
            };
            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", path))?;
            entries.push(Entry {
                path,
                abs: entry.path().to_path_buf(),
                meta: file_meta(&metadata),
                len: metadata.len(),
            });
        }
        Ok((entries, excluded))
    }

    fn in_pool<R: Send>(&self, job: impl FnOnce() -> R + Send) -> R {
        if self.config.threads == 0 {
            return job();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
        {
            Ok(pool) => pool.install(job),
            Err(err) => {
                tracing::debug!(error = %err, "falling back to the global rayon pool");
                job()
            }
        }
    }
}

fn read_content(path: &Path, len: u64) -> Result<Content> {
    if len >= MMAP_THRESHOLD {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        // SAFETY: the map is read-only and dropped before the scan returns
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map {}", path.display()))?;
        Ok(Content::Mapped(map))
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Content::Read(bytes))
    }
}

#[cfg(unix)]
fn file_meta(metadata: &std::fs::Metadata) -> FileMeta {
    use std::os::unix::fs::MetadataExt;
    FileMeta {
        mode: metadata.mode() & 0o7777,
        owner: Some(metadata.uid()),
    }
}

#[cfg(not(unix))]
fn file_meta(metadata: &std::fs::Metadata) -> FileMeta {
    FileMeta {
        mode: if metadata.permissions().readonly() { 0o444 } else { 0o644 },
        owner: None,
    }
}
