//! Connector registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::model::Connector;

/// Immutable set of prepared connectors, keyed by id.
///
/// Reloading builds a new registry; callers swap the `Arc` they hold.
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<Connector>>,
}

impl ConnectorRegistry {
    /// Build a registry from prepared connectors. Ids must be unique.
    pub fn from_connectors(connectors: impl IntoIterator<Item = Connector>) -> Result<Self> {
        let mut map = HashMap::new();
        for connector in connectors {
            let id = connector.id().to_string();
            if map.insert(id.clone(), Arc::new(connector)).is_some() {
                return Err(EngineError::DuplicateConnector(id));
            }
        }
        Ok(Self { connectors: map })
    }

    /// Load connector files. A directory contributes every `.json5` file
    /// it contains, in file name order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                files.extend(connector_files(path)?);
            } else {
                files.push(path.to_path_buf());
            }
        }

        let mut connectors = Vec::with_capacity(files.len());
        for file in &files {
            let connector = Connector::from_file(file)?;
            tracing::info!(
                connector = %connector.id(),
                path = %file.display(),
                "Loaded connector"
            );
            connectors.push(connector);
        }
        Self::from_connectors(connectors)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connector>> {
        self.connectors.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connectors.contains_key(id)
    }

    /// Connector ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

fn connector_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json5"))
        .collect();
    files.sort();
    Ok(files)
}
