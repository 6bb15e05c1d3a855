//! On-disk store management for blobs and trees

use crate::blob::BlobStore;
use crate::error::ValidationError;
use crate::file::File;
use crate::fingerprint::FingerprintConfig;
use crate::hash::Digest;
use crate::tree::Tree;
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Name of the metadata directory at the project root
pub const STORE_DIR: &str = ".chunkline";

const REQUIRED_DIRS: [&str; 4] = ["objects/blobs", "objects/trees", "graph", "tmp/ingest"];

/// `[store]` section of the project config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Blobs larger than this many bytes are zstd-compressed
    pub compression_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 4096,
        }
    }
}

/// Main store for chunkline data
///
/// Manages the `.chunkline/` directory structure:
/// ```text
/// .chunkline/
///   config.toml
///   HEAD
///   objects/
///     blobs/
///     trees/
///   graph/
///   tmp/
///     ingest/
/// ```
pub struct Store {
    /// Project root
    root: PathBuf,
    /// Path to .chunkline directory
    dir: PathBuf,
    blob_store: BlobStore,
    fingerprint: FingerprintConfig,
    /// Rehydrated trees by digest
    tree_cache: DashMap<Digest, Arc<Tree>>,
}

impl Store {
    /// Create the directory layout at the given project root
    pub fn init(root: &Path, config: &StoreConfig, fingerprint: FingerprintConfig) -> Result<Self> {
        use std::fs;

        let dir = root.join(STORE_DIR);
        if dir.exists() {
            anyhow::bail!("Store already initialized at {}", root.display());
        }

        fs::create_dir(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for sub in REQUIRED_DIRS {
            fs::create_dir_all(dir.join(sub))?;
        }
        fs::write(dir.join("HEAD"), "")?;

        tracing::info!(root = %root.display(), "initialized store");
        Ok(Self::assemble(root, dir, config, fingerprint))
    }

    /// Open an existing store
    pub fn open(root: &Path, config: &StoreConfig, fingerprint: FingerprintConfig) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        if !dir.exists() {
            anyhow::bail!("Store not initialized at {}", root.display());
        }
        for sub in REQUIRED_DIRS {
            if !dir.join(sub).exists() {
                anyhow::bail!("Missing required directory: {}", sub);
            }
        }
        Ok(Self::assemble(root, dir, config, fingerprint))
    }

    fn assemble(root: &Path, dir: PathBuf, config: &StoreConfig, fingerprint: FingerprintConfig) -> Self {
        let blob_store =
            BlobStore::new(dir.clone()).with_compression_threshold(config.compression_threshold);
        Self {
            root: root.to_path_buf(),
            dir,
            blob_store,
            fingerprint,
            tree_cache: DashMap::new(),
        }
    }

    /// Write a tree object; idempotent by digest
    pub fn write_tree(&self, tree: &Tree) -> Result<Digest> {
        let digest = tree.digest();
        let path = self.tree_path(&digest);
        if !path.exists() {
            let serialized = tree.serialize()?;
            atomic_write(&self.dir.join("tmp").join("ingest"), &path, &serialized)
                .with_context(|| format!("Failed to write tree {}", digest.short()))?;
            tracing::debug!(tree = %digest.short(), files = tree.len(), "wrote tree");
        }
        self.tree_cache
            .entry(digest)
            .or_insert_with(|| Arc::new(tree.clone()));
        Ok(digest)
    }

    /// Read a tree, rehydrating its fingerprints from the blob store
    pub fn read_tree(&self, digest: &Digest) -> Result<Arc<Tree>> {
        if let Some(cached) = self.tree_cache.get(digest) {
            return Ok(Arc::clone(&cached));
        }

        let path = self.tree_path(digest);
        if !path.exists() {
            anyhow::bail!("Tree not found: {}", digest);
        }
        let serialized = std::fs::read(&path)?;
        let tree = Tree::deserialize(&serialized)
            .with_context(|| format!("Failed to decode tree {}", digest.short()))?;

        if tree.digest() != *digest {
            anyhow::bail!("Tree hash mismatch: expected {}, got {}", digest, tree.digest());
        }

        let tree = Arc::new(
            tree.rehydrate(&self.blob_store, &self.fingerprint)
                .with_context(|| format!("Failed to load content of tree {}", digest.short()))?,
        );
        self.tree_cache.insert(*digest, Arc::clone(&tree));
        Ok(tree)
    }

    pub fn has_tree(&self, digest: &Digest) -> bool {
        self.tree_cache.contains_key(digest) || self.tree_path(digest).exists()
    }

    /// Bytes of one chunk of a stored tree
    pub fn read_chunk(&self, tree: &Tree, path: &str, index: usize) -> Result<Vec<u8>> {
        tree.chunk_bytes(&self.blob_store, path, index)
    }

    /// Reassemble a whole file from the blob store
    pub fn read_file_bytes(&self, file: &File) -> Result<Vec<u8>> {
        file.read_bytes(&self.blob_store)
            .with_context(|| format!("Failed to materialize {}", file.path))
    }

    fn tree_path(&self, digest: &Digest) -> PathBuf {
        // Fan-out structure: objects/trees/<hh>/<rest>
        let hex = digest.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        self.dir.join("objects/trees").join(prefix).join(suffix)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }

    pub fn fingerprint_config(&self) -> &FingerprintConfig {
        &self.fingerprint
    }

    /// Path to the .chunkline directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Project root path
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it to the target path.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    fs::create_dir_all(tmp_dir)?;
    let temp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    // Atomic on POSIX
    fs::rename(&temp_path, target)?;

    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Normalize a relative path for storage
///
/// - `/` separators
/// - no `..`, no absolute paths
/// - no `./` prefix
pub fn normalize_path(path: &Path) -> std::result::Result<String, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidPath {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    if path.is_absolute() {
        return Err(invalid("absolute paths not allowed"));
    }

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
                if cfg!(windows) {
                    parts.extend(part.split('\\').filter(|p| !p.is_empty()));
                } else {
                    parts.push(part);
                }
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("path traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths not allowed"))
            }
        }
    }

    if parts.iter().any(|p| *p == "..") {
        return Err(invalid("path traversal not allowed"));
    }
    if parts.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(parts.join("/"))
}

/// Check if a normalized path should be skipped by scans
///
/// Always ignores `.chunkline/` and `.git/`; `extra` adds path prefixes.
pub fn should_ignore(path: &str, extra: &[String]) -> bool {
    let under = |prefix: &str| {
        let prefix = prefix.trim_end_matches('/');
        !prefix.is_empty()
            && (path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/')))
    };
    under(STORE_DIR) || under(".git") || extra.iter().any(|prefix| under(prefix))
}
