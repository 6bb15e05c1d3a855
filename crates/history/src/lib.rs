//! Chunkline History - recorded snapshots of scanned trees
//!
//! - `Snapshot`: one recorded tree plus its parents and metadata
//! - `RevisionGraph`: append-only snapshot arena in sled
//! - `ProjectConfig`: `.chunkline/config.toml`
//! - `Repository`: store, graph and config behind one handle

pub mod config;
pub mod graph;
pub mod repository;
pub mod snapshot;

pub use config::ProjectConfig;
pub use graph::{GraphError, History, IntegrityReport, RevisionGraph};
pub use repository::{find_root, Recorded, Repository, VerifyReport};
pub use snapshot::{Snapshot, SnapshotId, SnapshotMeta};
