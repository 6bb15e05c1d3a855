//! Per-tree similarity index over chunk signatures

use ahash::{AHashMap, AHashSet};
use chunkline_core::{Chunk, Digest, Fingerprint, Tree};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Identifies a chunk within one tree: file path plus canonical chunk index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkRef {
    pub path: String,
    pub index: usize,
}

impl ChunkRef {
    pub fn new(path: impl Into<String>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }
}

/// A near-lookup query: the fingerprint plus where it came from, for tie-breaks
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub fingerprint: &'a Fingerprint,
    /// Path of the chunk the fingerprint was taken from
    pub path: Option<&'a str>,
    pub size: u64,
    pub symbol: Option<&'a str>,
}

impl<'a> Query<'a> {
    /// Query with a bare fingerprint
    pub fn fingerprint(fingerprint: &'a Fingerprint) -> Self {
        Self {
            fingerprint,
            path: None,
            size: 0,
            symbol: None,
        }
    }

    /// Query on behalf of an existing chunk
    pub fn of(chunk: &'a Chunk) -> Self {
        Self {
            fingerprint: &chunk.signature.fingerprint,
            path: Some(chunk.location.as_str()),
            size: chunk.size(),
            symbol: chunk.symbol.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearMatch {
    pub chunk: ChunkRef,
    /// Weighted Jaccard similarity in [0, 1]
    pub score: f64,
}

/// Lookup structure over one tree's chunks
///
/// Chunk ids are positions in `refs`, which is in (path, index) order.
pub struct SimilarityIndex {
    tree: Arc<Tree>,
    refs: Vec<ChunkRef>,
    exact: AHashMap<Digest, Vec<ChunkRef>>,
    /// Feature hash -> chunk ids carrying it
    features: AHashMap<u64, Vec<u32>>,
}

struct FileIndex {
    refs: Vec<ChunkRef>,
    exact: Vec<(Digest, usize)>,
    features: Vec<(u64, usize)>,
}

impl SimilarityIndex {
    /// Index every chunk of `tree`; files are indexed in parallel and merged in path order
    pub fn build(tree: Arc<Tree>) -> Self {
        let files: Vec<_> = tree.files().collect();
        let partials: Vec<FileIndex> = files
            .par_iter()
            .map(|file| {
                let mut partial = FileIndex {
                    refs: Vec::with_capacity(file.chunks.len()),
                    exact: Vec::with_capacity(file.chunks.len()),
                    features: Vec::new(),
                };
                for (index, chunk) in file.chunks.iter().enumerate() {
                    partial.refs.push(ChunkRef::new(file.path.as_str(), index));
                    partial.exact.push((chunk.exact(), index));
                    partial
                        .features
                        .extend(chunk.signature.fingerprint.features().map(|hash| (hash, index)));
                }
                partial
            })
            .collect();

        let mut refs = Vec::with_capacity(tree.chunk_count());
        let mut exact: AHashMap<Digest, Vec<ChunkRef>> = AHashMap::new();
        let mut features: AHashMap<u64, Vec<u32>> = AHashMap::new();
        for partial in partials {
            let base = refs.len();
            for (digest, local) in partial.exact {
                exact.entry(digest).or_default().push(partial.refs[local].clone());
            }
            for (hash, local) in partial.features {
                features.entry(hash).or_default().push((base + local) as u32);
            }
            refs.extend(partial.refs);
        }

        tracing::debug!(
            tree = %tree.digest().short(),
            chunks = refs.len(),
            digests = exact.len(),
            features = features.len(),
            "built similarity index"
        );

        Self {
            tree,
            refs,
            exact,
            features,
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Every indexed chunk, in (path, index) order
    pub fn refs(&self) -> &[ChunkRef] {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Resolve a reference produced by this index
    pub fn chunk(&self, chunk: &ChunkRef) -> Option<&Chunk> {
        self.tree
            .get(&chunk.path)
            .and_then(|file| file.chunks.get(chunk.index))
    }

    /// Chunks with exactly this content, in (path, index) order
    ///
    /// More than one result means the content is duplicated within the tree.
    pub fn exact_lookup(&self, digest: &Digest) -> &[ChunkRef] {
        self.exact.get(digest).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Digests present in this tree
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.exact.keys()
    }

    /// Chunks whose similarity to the query is at least `threshold`
    ///
    /// Ordered by score descending, then same file as the query, then
    /// smaller size difference, then symbol name (unnamed last), then
    /// chunk reference.
    pub fn near_lookup(&self, query: &Query<'_>, threshold: f64) -> Vec<NearMatch> {
        let mut candidates = AHashSet::new();
        for hash in query.fingerprint.features() {
            if let Some(ids) = self.features.get(&hash) {
                candidates.extend(ids.iter().copied());
            }
        }

        let mut matches: Vec<(NearMatch, &Chunk)> = candidates
            .into_iter()
            .filter_map(|id| {
                let chunk_ref = &self.refs[id as usize];
                let chunk = self.chunk(chunk_ref)?;
                let score = query.fingerprint.similarity(&chunk.signature.fingerprint);
                (score >= threshold).then(|| {
                    (
                        NearMatch {
                            chunk: chunk_ref.clone(),
                            score,
                        },
                        chunk,
                    )
                })
            })
            .collect();

        matches.sort_by(|(a, ca), (b, cb)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| same_file_first(query, &a.chunk, &b.chunk))
                .then_with(|| ca.size().abs_diff(query.size).cmp(&cb.size().abs_diff(query.size)))
                .then_with(|| symbol_order(ca.symbol.as_deref(), cb.symbol.as_deref()))
                .then_with(|| a.chunk.cmp(&b.chunk))
        });
        matches.into_iter().map(|(m, _)| m).collect()
    }

    /// Fraction of `query` covered by the candidate chunk
    pub fn containment(&self, query: &Fingerprint, candidate: &ChunkRef) -> f64 {
        self.chunk(candidate)
            .map(|chunk| query.containment_in(&chunk.signature.fingerprint))
            .unwrap_or(0.0)
    }
}

fn same_file_first(query: &Query<'_>, a: &ChunkRef, b: &ChunkRef) -> Ordering {
    match query.path {
        Some(path) => (a.path != path).cmp(&(b.path != path)),
        None => Ordering::Equal,
    }
}

/// Named before unnamed, then by name
pub(crate) fn symbol_order(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
