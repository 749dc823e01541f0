//! Persistence for cellgraph reference graphs.
//!
//! Provides the [`GraphStore`] trait defining the storage contract, plus the
//! [`InMemoryStore`] and [`DirectoryStore`] backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`traits`]: GraphStore trait definition and name validation
//! - [`memory`]: InMemoryStore implementation
//! - [`directory`]: DirectoryStore implementation and its StoreConfig
//! - [`hash`]: blake3 node and graph digests
//! - [`dirty`]: change detection between snapshots

pub mod directory;
pub mod dirty;
pub mod error;
pub mod hash;
pub mod memory;
pub mod traits;

// Re-export key types for ergonomic use.
pub use directory::{DirectoryStore, StoreConfig};
pub use dirty::{compute_dirty_set, DirtySet};
pub use error::StorageError;
pub use hash::{graph_digest, hash_encoded, node_digests};
pub use memory::InMemoryStore;
pub use traits::{validate_name, GraphStore};
