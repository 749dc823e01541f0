//! Storage error types for cellgraph-storage.
//!
//! [`StorageError`] covers the failure modes of persisting graphs:
//! filesystem access, naming, lookup and errors bubbled up from the core
//! crate while encoding or decoding graph documents.

use thiserror::Error;

use cellgraph_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Encoding or decoding the graph document failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reading or writing the backing files failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No graph is stored under the given name.
    #[error("graph not found: {name}")]
    GraphNotFound { name: String },

    /// Graph names must be non-empty and use `[A-Za-z0-9_.-]` only.
    #[error("invalid graph name: '{name}'")]
    InvalidName { name: String },
}
