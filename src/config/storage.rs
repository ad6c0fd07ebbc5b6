//! StorageConfig and per-environment data paths.

use crate::config::xdg;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of all application data; `$XDG_DATA_HOME/envtag` when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// File listing open environments; `$XDG_CONFIG_HOME/envtag/state.toml` when unset
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ApiError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => xdg::default_data_dir(),
        }
    }

    pub fn resolve_state_file(&self) -> Result<PathBuf, ApiError> {
        match &self.state_file {
            Some(path) => Ok(path.clone()),
            None => Ok(xdg::config_home()?.join("envtag").join("state.toml")),
        }
    }

    /// Data directory of one environment (store and thumbnails)
    pub fn env_data_dir(data_dir: &Path, root: &Path) -> PathBuf {
        xdg::mirrored_dir(&data_dir.join("envs"), root)
    }
}
