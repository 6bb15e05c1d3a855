//! Error types for model validation and content storage

use crate::hash::Digest;

/// Malformed chunk/range/symbol structure produced by a backend.
///
/// Fails the scan of the offending file only; the tree scan carries on
/// without it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("chunk {index}: range {start}..{end} is inverted")]
    InvertedRange { index: usize, start: u64, end: u64 },

    #[error("chunk {index}: range {start}..{end} exceeds content length {len}")]
    OutOfBounds { index: usize, start: u64, end: u64, len: u64 },

    #[error("chunk {index}: parent index {parent} is invalid")]
    InvalidParent { index: usize, parent: usize },

    #[error("chunk {index} ({start}..{end}) is not strictly contained in its parent ({parent_start}..{parent_end})")]
    NotContained {
        index: usize,
        start: u64,
        end: u64,
        parent_start: u64,
        parent_end: u64,
    },

    #[error("sibling chunks overlap: {first_start}..{first_end} and {second_start}..{second_end}")]
    SiblingOverlap {
        first_start: u64,
        first_end: u64,
        second_start: u64,
        second_end: u64,
    },

    #[error("top-level chunks do not cover bytes {start}..{end}")]
    Gap { start: u64, end: u64 },

    #[error("chunk {index} references undeclared symbol '{name}'")]
    UndeclaredSymbol { index: usize, name: String },

    #[error("symbol '{name}' is bound to more than one chunk")]
    SymbolRebound { name: String },

    #[error("symbol '{name}' declared with parent {parent:?} collides with existing parent {existing:?}")]
    SymbolCollision {
        name: String,
        existing: Option<String>,
        parent: Option<String>,
    },

    #[error("symbol '{name}' has undeclared parent '{parent}'")]
    UnknownSymbolParent { name: String, parent: String },

    #[error("symbol '{name}' is part of a parent cycle")]
    SymbolCycle { name: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Content store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has no content for this digest (corrupted or incomplete store)
    #[error("content not found: {0}")]
    NotFound(Digest),

    #[error("corrupt object {digest}: {reason}")]
    Corrupt { digest: Digest, reason: String },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn corrupt(digest: Digest, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            digest,
            reason: reason.into(),
        }
    }
}
