//! Files: validated chunk forests over a file's content

use crate::backend::{is_text, Extraction, RawChunk};
use crate::blob::ContentStore;
use crate::chunk::{Chunk, Signature};
use crate::error::{StoreError, ValidationError};
use crate::fingerprint::{Fingerprint, FingerprintConfig};
use crate::hash::{Digest, IncrementalHasher};
use crate::range::{LineIndex, Range};
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ownership and permission metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMeta {
    /// Unix permission bits
    pub mode: u32,
    /// Owning user id, when the platform has one
    pub owner: Option<u32>,
}

impl Default for FileMeta {
    fn default() -> Self {
        Self {
            mode: 0o644,
            owner: None,
        }
    }
}

/// A file decomposed into chunks
///
/// Chunks are stored in canonical pre-order (start ascending, enclosing
/// chunk first), so every parent precedes its children. Top-level chunks
/// partition the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    pub meta: FileMeta,
    /// Digest of the bytes covered by the top-level chunks, in order
    pub digest: Digest,
    pub size: u64,
    pub text: bool,
    pub chunks: Vec<Chunk>,
}

impl File {
    /// Validate backend output and assemble the file
    ///
    /// Returns the file and the symbols it declares. Pure: identical input
    /// always yields an identical file.
    pub fn build(
        path: &str,
        meta: FileMeta,
        content: &[u8],
        extraction: Extraction,
        config: &FingerprintConfig,
    ) -> Result<(File, Vec<Symbol>), ValidationError> {
        if path.is_empty() {
            return Err(ValidationError::InvalidPath {
                path: path.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let len = content.len() as u64;
        let Extraction { mut chunks, symbols } = extraction;
        if chunks.is_empty() {
            chunks.push(RawChunk::new(0, len));
        }

        check_bounds(&chunks, len)?;
        let ordered = canonical_order(&chunks);
        check_nesting(&ordered)?;
        check_partition(&ordered, len)?;
        check_symbols(&ordered, &symbols)?;

        let text = is_text(content);
        let lines = text.then(|| LineIndex::new(content));

        let mut hasher = IncrementalHasher::new();
        let mut built = Vec::with_capacity(ordered.len());
        for raw in &ordered {
            let slice = &content[raw.start as usize..raw.end as usize];
            if raw.parent.is_none() {
                hasher.update(slice);
            }
            let range = match &lines {
                Some(lines) => Range::text(raw.start, raw.end, lines),
                None => Range::binary(raw.start, raw.end),
            }
            .ok_or(ValidationError::InvertedRange {
                index: built.len(),
                start: raw.start,
                end: raw.end,
            })?;

            built.push(Chunk {
                location: path.to_string(),
                range,
                signature: Signature::compute(slice, text, config),
                symbol: raw.symbol.clone(),
                parent: raw.parent,
            });
        }

        let file = File {
            path: path.to_string(),
            meta,
            digest: hasher.finalize(),
            size: len,
            text,
            chunks: built,
        };
        Ok((file, symbols))
    }

    /// Recompute fingerprints from content (stored files do not carry them)
    pub fn with_fingerprints(mut self, content: &[u8], config: &FingerprintConfig) -> Self {
        for chunk in &mut self.chunks {
            let slice = &content[chunk.range.start() as usize..chunk.range.end() as usize];
            chunk.signature.fingerprint = Fingerprint::compute(slice, self.text, config);
        }
        self
    }

    /// Reassemble the file from its top-level chunks, checking the file digest
    pub fn read_bytes(&self, store: &dyn ContentStore) -> Result<Vec<u8>, StoreError> {
        let mut content = Vec::with_capacity(self.size as usize);
        for chunk in self.top_level() {
            content.extend_from_slice(&store.get(&chunk.exact())?);
        }

        let mut hasher = IncrementalHasher::new();
        hasher.update(&content);
        let actual = hasher.finalize();
        if actual != self.digest {
            return Err(StoreError::corrupt(
                self.digest,
                format!("{} reassembles to {}", self.path, actual),
            ));
        }
        Ok(content)
    }

    /// Bytes of one chunk; nested chunks are sliced out of their top-level ancestor
    pub fn chunk_bytes(&self, store: &dyn ContentStore, index: usize) -> Result<Vec<u8>, StoreError> {
        let chunk = &self.chunks[index];
        let ancestor = &self.chunks[self.top_level_ancestor(index)];
        let bytes = store.get(&ancestor.exact())?;

        let start = (chunk.range.start() - ancestor.range.start()) as usize;
        let end = (chunk.range.end() - ancestor.range.start()) as usize;
        if end > bytes.len() {
            return Err(StoreError::corrupt(
                ancestor.exact(),
                format!("chunk {}..{} exceeds stored length {}", start, end, bytes.len()),
            ));
        }
        Ok(bytes[start..end].to_vec())
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|chunk| chunk.is_top_level())
    }

    /// Index of the top-level chunk enclosing chunk `index`
    pub fn top_level_ancestor(&self, mut index: usize) -> usize {
        while let Some(parent) = self.chunks[index].parent {
            index = parent;
        }
        index
    }

    /// Symbol names bound to chunks of this file
    pub fn bound_symbols(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .filter_map(|chunk| chunk.symbol.as_deref())
            .collect()
    }

    /// Innermost chunk covering a byte offset
    pub fn chunk_at(&self, offset: u64) -> Option<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.range.contains_offset(offset))
            .max_by_key(|(index, _)| *index)
            .map(|(index, _)| index)
    }
}

fn check_bounds(chunks: &[RawChunk], len: u64) -> Result<(), ValidationError> {
    for (index, raw) in chunks.iter().enumerate() {
        if raw.start > raw.end {
            return Err(ValidationError::InvertedRange {
                index,
                start: raw.start,
                end: raw.end,
            });
        }
        if raw.end > len {
            return Err(ValidationError::OutOfBounds {
                index,
                start: raw.start,
                end: raw.end,
                len,
            });
        }
        if let Some(parent) = raw.parent {
            if parent >= chunks.len() || parent == index {
                return Err(ValidationError::InvalidParent { index, parent });
            }
        }
    }
    Ok(())
}

/// Sort into canonical pre-order and remap parent indices
fn canonical_order(chunks: &[RawChunk]) -> Vec<RawChunk> {
    let mut order: Vec<usize> = (0..chunks.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (&chunks[a], &chunks[b]);
        ca.start
            .cmp(&cb.start)
            .then_with(|| cb.end.cmp(&ca.end))
            .then_with(|| a.cmp(&b))
    });

    let mut position = vec![0usize; chunks.len()];
    for (new_index, &old_index) in order.iter().enumerate() {
        position[old_index] = new_index;
    }

    order
        .iter()
        .map(|&old_index| {
            let raw = &chunks[old_index];
            RawChunk {
                start: raw.start,
                end: raw.end,
                parent: raw.parent.map(|p| position[p]),
                symbol: raw.symbol.clone(),
            }
        })
        .collect()
}

fn check_nesting(chunks: &[RawChunk]) -> Result<(), ValidationError> {
    let mut siblings: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
    for (index, raw) in chunks.iter().enumerate() {
        if let Some(parent) = raw.parent {
            let outer = &chunks[parent];
            let contained = outer.start <= raw.start && raw.end <= outer.end;
            let same_span = outer.start == raw.start && outer.end == raw.end;
            if !contained || same_span {
                return Err(ValidationError::NotContained {
                    index,
                    start: raw.start,
                    end: raw.end,
                    parent_start: outer.start,
                    parent_end: outer.end,
                });
            }
        }
        siblings.entry(raw.parent).or_default().push(index);
    }

    for group in siblings.values() {
        let mut furthest: Option<&RawChunk> = None;
        for &index in group {
            let raw = &chunks[index];
            if let Some(prev) = furthest {
                if prev.start < raw.end && raw.start < prev.end {
                    return Err(ValidationError::SiblingOverlap {
                        first_start: prev.start,
                        first_end: prev.end,
                        second_start: raw.start,
                        second_end: raw.end,
                    });
                }
                if raw.end > prev.end {
                    furthest = Some(raw);
                }
            } else {
                furthest = Some(raw);
            }
        }
    }
    Ok(())
}

fn check_partition(chunks: &[RawChunk], len: u64) -> Result<(), ValidationError> {
    let mut cursor = 0u64;
    for raw in chunks.iter().filter(|raw| raw.parent.is_none()) {
        if raw.start > cursor {
            return Err(ValidationError::Gap {
                start: cursor,
                end: raw.start,
            });
        }
        cursor = cursor.max(raw.end);
    }
    if cursor < len {
        return Err(ValidationError::Gap { start: cursor, end: len });
    }
    Ok(())
}

fn check_symbols(chunks: &[RawChunk], symbols: &[Symbol]) -> Result<(), ValidationError> {
    let mut declared: BTreeMap<&str, &Option<String>> = BTreeMap::new();
    for symbol in symbols {
        if let Some(parent) = declared.insert(&symbol.name, &symbol.parent) {
            if *parent != symbol.parent {
                return Err(ValidationError::SymbolCollision {
                    name: symbol.name.clone(),
                    existing: parent.clone(),
                    parent: symbol.parent.clone(),
                });
            }
        }
    }

    let mut bound = HashSet::new();
    for (index, raw) in chunks.iter().enumerate() {
        let Some(name) = raw.symbol.as_deref() else {
            continue;
        };
        if !declared.contains_key(name) {
            return Err(ValidationError::UndeclaredSymbol {
                index,
                name: name.to_string(),
            });
        }
        if !bound.insert(name) {
            return Err(ValidationError::SymbolRebound {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
