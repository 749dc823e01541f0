//! In-memory implementation of [`GraphStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and ephemeral
//! sessions. It keeps serialized documents rather than live graphs, so a
//! load goes through exactly the same decode path as the directory store.

use std::collections::BTreeMap;

use cellgraph_core::{FunctionRegistry, ReferenceGraph};

use crate::error::StorageError;
use crate::traits::{validate_name, GraphStore};

/// Graph documents keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: BTreeMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON document stored under `name`.
    pub fn document(&self, name: &str) -> Option<&str> {
        self.documents.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl GraphStore for InMemoryStore {
    fn save(&mut self, name: &str, graph: &ReferenceGraph) -> Result<(), StorageError> {
        validate_name(name)?;
        let text = graph.to_json()?;
        self.documents.insert(name.to_string(), text);
        tracing::info!(name, nodes = graph.node_count(), "saved graph");
        Ok(())
    }

    fn load(
        &self,
        name: &str,
        registry: &FunctionRegistry,
    ) -> Result<ReferenceGraph, StorageError> {
        let text = self
            .documents
            .get(name)
            .ok_or_else(|| StorageError::GraphNotFound {
                name: name.to_string(),
            })?;
        Ok(ReferenceGraph::from_json(text, registry)?)
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        if self.documents.remove(name).is_none() {
            return Err(StorageError::GraphNotFound {
                name: name.to_string(),
            });
        }
        tracing::info!(name, "deleted graph");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.documents.keys().cloned().collect())
    }

    fn contains(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.documents.contains_key(name))
    }
}
