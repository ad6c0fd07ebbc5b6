//! Filesystem and desktop collaborators.
//!
//! Environments never touch `std::fs` directly for user files; they go through these traits
//! so listing, deletion and renames can be substituted in tests.

use crate::error::ApiError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
}

pub trait Filesystem: Send + Sync {
    /// `Some(is_dir)` if the path exists
    fn stat(&self, path: &Path) -> Option<bool>;
    /// Immediate children of a directory, sorted by name
    fn list_dir(&self, path: &Path) -> Result<Vec<EntryInfo>, ApiError>;
    /// Paths of every descendant of a directory, relative to it
    fn descendants(&self, path: &Path) -> Result<Vec<PathBuf>, ApiError>;
    fn remove(&self, path: &Path) -> Result<(), ApiError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), ApiError>;
}

/// Filesystem backed by the local disk
#[derive(Debug, Default, Clone)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn stat(&self, path: &Path) -> Option<bool> {
        std::fs::metadata(path).ok().map(|m| m.is_dir())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<EntryInfo>, ApiError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => {
                    tracing::warn!(entry = ?entry.path(), "Skipping entry with non UTF8 name");
                    continue;
                }
            };
            // Follow symlinks for the directory check only
            let is_dir = entry.file_type().is_dir()
                || (entry.path_is_symlink() && entry.path().is_dir());
            entries.push(EntryInfo { name, is_dir });
        }
        Ok(entries)
    }

    fn descendants(&self, path: &Path) -> Result<Vec<PathBuf>, ApiError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(path).min_depth(1) {
            let entry = entry.map_err(|e| {
                ApiError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if let Ok(relative) = entry.path().strip_prefix(path) {
                out.push(relative.to_path_buf());
            }
        }
        Ok(out)
    }

    fn remove(&self, path: &Path) -> Result<(), ApiError> {
        let meta = std::fs::symlink_metadata(path)
            .map_err(|_| ApiError::PathNotFound(path.display().to_string()))?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), ApiError> {
        std::fs::rename(from, to)?;
        Ok(())
    }
}

/// Hands files over to the desktop (privileged clients only)
pub trait DesktopShell: Send + Sync {
    fn open(&self, path: &Path) -> Result<(), ApiError>;
    fn reveal(&self, path: &Path) -> Result<(), ApiError>;
}

/// Launches the platform opener
#[derive(Debug, Default, Clone)]
pub struct SystemShell;

impl SystemShell {
    fn opener() -> &'static str {
        if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        }
    }

    fn spawn(target: &Path) -> Result<(), ApiError> {
        std::process::Command::new(Self::opener())
            .arg(target)
            .spawn()
            .map(|_| ())
            .map_err(ApiError::Io)
    }
}

impl DesktopShell for SystemShell {
    fn open(&self, path: &Path) -> Result<(), ApiError> {
        Self::spawn(path)
    }

    fn reveal(&self, path: &Path) -> Result<(), ApiError> {
        let folder = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        Self::spawn(folder)
    }
}
