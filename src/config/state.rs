//! Open-environment state: which roots were open when the authority last ran.

use crate::error::ApiError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    open_environments: Vec<PathBuf>,
}

/// TOML file holding the list of open environment roots
pub struct OpenEnvironmentsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OpenEnvironmentsFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Roots in the order they were opened. A missing file means none.
    pub fn list(&self) -> Result<Vec<PathBuf>, ApiError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.open_environments)
    }

    pub fn add(&self, root: &Path) -> Result<(), ApiError> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        if !doc.open_environments.iter().any(|p| p == root) {
            doc.open_environments.push(root.to_path_buf());
            self.write(&doc)?;
        }
        Ok(())
    }

    pub fn remove(&self, root: &Path) -> Result<(), ApiError> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        let before = doc.open_environments.len();
        doc.open_environments.retain(|p| p != root);
        if doc.open_environments.len() != before {
            self.write(&doc)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<StateDocument, ApiError> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to read state file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to parse state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write(&self, doc: &StateDocument) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(doc)
            .map_err(|e| ApiError::ConfigError(format!("Failed to encode state: {}", e)))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
