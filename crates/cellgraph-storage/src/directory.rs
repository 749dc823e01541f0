//! Filesystem implementation of [`GraphStore`].
//!
//! Each graph lives in `<root>/<name>.json`. Writes go to a sibling
//! temporary file which is then renamed over the target, so readers never
//! observe a half-written document.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cellgraph_core::{FunctionRegistry, ReferenceGraph};

use crate::error::StorageError;
use crate::traits::{validate_name, GraphStore};

const EXTENSION: &str = "json";

/// Configuration for [`DirectoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the graph documents. Created on open.
    pub root: PathBuf,
    /// Write indented JSON.
    pub pretty: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from("graphs"),
            pretty: false,
        }
    }
}

/// Stores graphs as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    config: StoreConfig,
}

impl DirectoryStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.root)?;
        tracing::debug!(root = %config.root.display(), "opened graph directory");
        Ok(DirectoryStore { config })
    }

    /// Opens a store rooted at `root` with default settings.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open(StoreConfig {
            root: root.into(),
            ..StoreConfig::default()
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Path of the document for `name`.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.config.root.join(format!("{name}.{EXTENSION}")))
    }
}

fn not_found(name: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::GraphNotFound {
            name: name.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

impl GraphStore for DirectoryStore {
    fn save(&mut self, name: &str, graph: &ReferenceGraph) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        let text = if self.config.pretty {
            graph.to_json_pretty()?
        } else {
            graph.to_json()?
        };

        let staging = path.with_extension(format!("{EXTENSION}.tmp"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        tracing::info!(name, path = %path.display(), nodes = graph.node_count(), "saved graph");
        Ok(())
    }

    fn load(
        &self,
        name: &str,
        registry: &FunctionRegistry,
    ) -> Result<ReferenceGraph, StorageError> {
        let path = self.path_of(name)?;
        let text = fs::read_to_string(&path).map_err(|e| not_found(name, e))?;
        let graph = ReferenceGraph::from_json(&text, registry)?;
        tracing::debug!(name, nodes = graph.node_count(), "loaded graph");
        Ok(graph)
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(|e| not_found(name, e))?;
        tracing::info!(name, "deleted graph");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn contains(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.path_of(name)?.is_file())
    }
}
