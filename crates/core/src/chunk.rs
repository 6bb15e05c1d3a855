//! Chunks: addressable fragments of a file's content

use crate::fingerprint::{Fingerprint, FingerprintConfig};
use crate::hash::{hash_bytes, Digest};
use crate::range::Range;
use serde::{Deserialize, Serialize};

/// Exact and near-match identity of a chunk's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Digest of the chunk's bytes
    pub exact: Digest,
    /// Edit-tolerant summary, recomputed from content when a tree is loaded
    #[serde(skip)]
    pub fingerprint: Fingerprint,
}

impl Signature {
    pub fn compute(content: &[u8], is_text: bool, config: &FingerprintConfig) -> Self {
        Self {
            exact: hash_bytes(content),
            fingerprint: Fingerprint::compute(content, is_text, config),
        }
    }
}

/// A contiguous fragment of a file
///
/// Chunks of a file are kept in canonical pre-order; `parent` indexes into
/// the owning file's chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Path of the owning file
    pub location: String,
    pub range: Range,
    pub signature: Signature,
    /// Name of the symbol this chunk realizes, if any
    pub symbol: Option<String>,
    /// Index of the enclosing chunk, `None` for top-level chunks
    pub parent: Option<usize>,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.range.len()
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn exact(&self) -> Digest {
        self.signature.exact
    }
}
