//! Trees: immutable, digest-addressed collections of files

use crate::blob::ContentStore;
use crate::error::{StoreError, ValidationError};
use crate::file::File;
use crate::fingerprint::FingerprintConfig;
use crate::hash::{Digest, IncrementalHasher};
use crate::symbol::{Symbol, SymbolTable};
use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

const MAGIC: &[u8; 4] = b"CLT1";

/// Paths up to 64 bytes stay on the stack
type PathKey = SmallVec<[u8; 64]>;

fn path_key(path: &str) -> PathKey {
    SmallVec::from_slice(path.as_bytes())
}

/// A project state: files by path plus the tree-wide symbol namespace
///
/// Built through [`TreeBuilder`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    files: BTreeMap<PathKey, File>,
    /// Declared symbols, sorted by name
    symbols: Vec<Symbol>,
    digest: Digest,
}

/// Stored form of a tree (fingerprints are not persisted)
#[derive(Serialize, Deserialize)]
struct TreeObject {
    files: Vec<File>,
    symbols: Vec<Symbol>,
}

impl Tree {
    /// The empty tree
    pub fn empty() -> Self {
        TreeBuilder::new().build().0
    }

    fn from_parts(files: BTreeMap<PathKey, File>, symbols: Vec<Symbol>) -> Self {
        let digest = manifest_digest(&files);
        Self {
            files,
            symbols,
            digest,
        }
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn get(&self, path: &str) -> Option<&File> {
        self.files.get(&path_key(path))
    }

    /// Files in lexicographic path order
    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(|file| file.chunks.len()).sum()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .binary_search_by(|symbol| symbol.name.as_str().cmp(name))
            .ok()
            .map(|index| &self.symbols[index])
    }

    /// Bytes of chunk `index` of the file at `path`
    pub fn chunk_bytes(&self, store: &dyn ContentStore, path: &str, index: usize) -> Result<Vec<u8>> {
        let file = self
            .get(path)
            .ok_or_else(|| anyhow::anyhow!("No file at {} in tree {}", path, self.digest.short()))?;
        if index >= file.chunks.len() {
            anyhow::bail!("{} has {} chunks, no chunk {}", path, file.chunks.len(), index);
        }
        Ok(file.chunk_bytes(store, index)?)
    }

    /// Serialize the tree (CLT1 format)
    ///
    /// Format:
    /// - magic: "CLT1" (4 bytes)
    /// - body: bincode of files in path order and symbols in name order
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let object = TreeObject {
            files: self.files.values().cloned().collect(),
            symbols: self.symbols.clone(),
        };
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&bincode::serialize(&object)?);
        Ok(bytes)
    }

    /// Deserialize a tree written by [`Tree::serialize`]
    ///
    /// Fingerprints come back empty; see [`Tree::rehydrate`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() {
            anyhow::bail!("Invalid tree data: too short");
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            anyhow::bail!("Invalid tree magic bytes");
        }

        let object: TreeObject = bincode::deserialize(&bytes[MAGIC.len()..])?;
        let files = object
            .files
            .into_iter()
            .map(|file| (path_key(&file.path), file))
            .collect();
        Ok(Self::from_parts(files, object.symbols))
    }

    /// Recompute every chunk fingerprint from content in `store`
    ///
    /// A missing chunk is fatal: the tree cannot be compared without it.
    pub fn rehydrate(self, store: &dyn ContentStore, config: &FingerprintConfig) -> Result<Self, StoreError> {
        let files: Vec<File> = self.files.into_values().collect();
        let files = files
            .into_par_iter()
            .map(|file| {
                let content = file.read_bytes(store)?;
                Ok(file.with_fingerprints(&content, config))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Self {
            files: files.into_iter().map(|file| (path_key(&file.path), file)).collect(),
            symbols: self.symbols,
            digest: self.digest,
        })
    }
}

/// Digest over the path-sorted manifest
///
/// Per file: path_len u32, path bytes, file digest, mode u32, owner flag u8
/// and owner u32. Chunk decomposition does not enter the digest.
fn manifest_digest(files: &BTreeMap<PathKey, File>) -> Digest {
    let mut hasher = IncrementalHasher::new();
    hasher.update(MAGIC);
    hasher.update(&(files.len() as u32).to_le_bytes());
    for (path, file) in files {
        hasher.update(&(path.len() as u32).to_le_bytes());
        hasher.update(path);
        hasher.update(file.digest.as_bytes());
        hasher.update(&file.meta.mode.to_le_bytes());
        match file.meta.owner {
            Some(uid) => {
                hasher.update(&[1]);
                hasher.update(&uid.to_le_bytes());
            }
            None => hasher.update(&[0]),
        }
    }
    hasher.finalize()
}

struct Candidate {
    file: File,
    symbols: Vec<Symbol>,
}

/// Folds validated files into a tree, owning the symbol table for that tree
#[derive(Default)]
pub struct TreeBuilder {
    candidates: BTreeMap<String, Candidate>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file with the symbols it declares; a later file at the same path replaces it
    pub fn add(&mut self, file: File, symbols: Vec<Symbol>) {
        self.candidates
            .insert(file.path.clone(), Candidate { file, symbols });
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Build the tree, returning files excluded for symbol conflicts
    ///
    /// Files are admitted in path order. Conflicts with earlier files
    /// exclude the later file. Unknown parents and cycles then exclude the
    /// last offending declaring file, one at a time, until the table
    /// resolves. Conflicts are re-checked after every such exclusion, so a
    /// file only stays out if it still clashes with a file that stays in.
    pub fn build(self) -> (Tree, Vec<(String, ValidationError)>) {
        let mut unresolved: Vec<(String, ValidationError)> = Vec::new();
        let mut dropped: BTreeSet<&str> = BTreeSet::new();

        let (table, active, conflicts) = loop {
            let mut table = SymbolTable::new();
            let mut active: BTreeSet<&str> = BTreeSet::new();
            let mut conflicts = Vec::new();
            for (path, candidate) in &self.candidates {
                let path = path.as_str();
                if dropped.contains(path) {
                    continue;
                }
                let bound = candidate.file.bound_symbols();
                match table.admit(path, &candidate.symbols, &bound) {
                    Ok(()) => {
                        active.insert(path);
                    }
                    Err(err) => conflicts.push((path.to_string(), err)),
                }
            }

            let offender = table
                .unresolved()
                .into_iter()
                .max_by(|(a, _), (b, _)| a.cmp(b));
            match offender {
                None => break (table, active, conflicts),
                Some((path, err)) => {
                    let key = active.get(path.as_str()).copied();
                    let Some(key) = key else {
                        break (table, active, conflicts);
                    };
                    tracing::warn!(path = %path, error = %err, "excluding file with unresolved symbols");
                    dropped.insert(key);
                    unresolved.push((path, err));
                }
            }
        };

        for (path, err) in &conflicts {
            tracing::warn!(path = %path, error = %err, "excluding file with conflicting symbols");
        }
        let mut excluded = conflicts;
        excluded.extend(unresolved);

        let keep: BTreeSet<String> = active.into_iter().map(str::to_string).collect();
        let files = self
            .candidates
            .into_iter()
            .filter(|(path, _)| keep.contains(path))
            .map(|(path, candidate)| (path_key(&path), candidate.file))
            .collect();

        excluded.sort_by(|(a, _), (b, _)| a.cmp(b));
        (Tree::from_parts(files, table.into_symbols()), excluded)
    }
}
