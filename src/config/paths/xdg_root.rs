//! XDG Base Directory utilities.

use crate::error::ApiError;
use std::path::{Path, PathBuf};

/// Get XDG data home directory
///
/// Returns `$XDG_DATA_HOME` if set, otherwise defaults to `$HOME/.local/share`
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home));
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// Get XDG config home directory
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise defaults to `$HOME/.config`
pub fn config_home() -> Result<PathBuf, ApiError> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config_home));
    }

    let home = std::env::var("HOME").map_err(|_| {
        ApiError::ConfigError(
            "Could not determine XDG config home directory (HOME not set)".to_string(),
        )
    })?;

    Ok(PathBuf::from(home).join(".config"))
}

/// Default application data directory: `$XDG_DATA_HOME/envtag`
pub fn default_data_dir() -> Result<PathBuf, ApiError> {
    data_home().map(|home| home.join("envtag")).ok_or_else(|| {
        ApiError::ConfigError(
            "Could not determine XDG data home directory (HOME not set)".to_string(),
        )
    })
}

/// Mirror an absolute environment root under `base`.
///
/// `/home/user/photos` becomes `<base>/home/user/photos`, so every environment gets its own
/// data directory without writing anything inside the user's folder.
pub fn mirrored_dir(base: &Path, root: &Path) -> PathBuf {
    let mut dir = base.to_path_buf();
    for component in root.components() {
        match component {
            std::path::Component::RootDir
            | std::path::Component::CurDir
            | std::path::Component::ParentDir => {}
            std::path::Component::Prefix(prefix) => {
                let raw = prefix.as_os_str().to_string_lossy().replace(':', "");
                dir = dir.join(raw);
            }
            std::path::Component::Normal(name) => {
                dir = dir.join(name);
            }
        }
    }
    dir
}
