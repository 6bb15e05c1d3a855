//! Chunk lineage between trees
//!
//! This crate provides:
//! - A per-tree similarity index (exact digests plus fingerprint features)
//! - The lineage engine classifying every chunk between two trees
//! - Lineage reports with filtered views and single-chunk traces

pub mod config;
pub mod engine;
pub mod index;
pub mod report;

// Re-exports
pub use config::LineageConfig;
pub use engine::LineageEngine;
pub use index::{ChunkRef, NearMatch, Query, SimilarityIndex};
pub use report::{ChunkLocation, Lineage, LineageKind, LineageReport, Summary};
