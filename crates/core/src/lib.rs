//! Chunkline Core - content-addressed model of a project as files, chunks and symbols
//!
//! This crate provides the foundational layer:
//! - BLAKE3 hashing and content-addressed storage (on-disk and in-memory)
//! - Range / chunk / symbol / file / tree value types and their validation
//! - Structural fingerprints for near-duplicate detection
//! - The pluggable extraction backend interface and its default backends
//! - Parallel filesystem scanning into a tree
//! - On-disk store management

pub mod backend;
pub mod blob;
pub mod chunk;
pub mod error;
pub mod file;
pub mod fingerprint;
pub mod hash;
pub mod range;
pub mod scan;
pub mod store;
pub mod symbol;
pub mod tree;

// Re-export main types for convenience
pub use backend::{Backend, BackendKind, BlockBackend, Extraction, RawChunk, UnsupportedFormat, WholeFileBackend};
pub use blob::{BlobStore, ContentStore, MemoryStore};
pub use chunk::{Chunk, Signature};
pub use error::{StoreError, ValidationError};
pub use file::{File, FileMeta};
pub use fingerprint::{Fingerprint, FingerprintConfig};
pub use hash::{hash_bytes, Digest, IncrementalHasher};
pub use range::{Range, TextPosition};
pub use scan::{ScanConfig, ScanReport, Scanner};
pub use store::{Store, StoreConfig};
pub use symbol::{Symbol, SymbolTable};
pub use tree::{Tree, TreeBuilder};

/// Common result type used by the store layout and scanning glue
pub type Result<T> = anyhow::Result<T>;
