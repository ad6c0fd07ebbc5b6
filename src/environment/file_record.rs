//! FileRecord: ephemeral description of one path at a point in time.

use crate::identity::{base_name, path_hash};
use crate::types::{EntityId, FileHash};
use serde::{Deserialize, Serialize};

/// Whether and when a preview image exists for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThumbnailState {
    Impossible,
    Possible,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub hash: FileHash,
    /// Normalized environment-relative path
    pub nix_path: String,
    pub base: String,
    /// Extension without the leading dot, empty if none
    pub ext: String,
    pub is_dir: bool,
    pub thumb: ThumbnailState,
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    /// Child hashes, present only for directories that have been listed
    #[serde(default)]
    pub file_hashes: Option<Vec<FileHash>>,
}

impl FileRecord {
    /// Build a record for a normalized path with no entity and no listing.
    pub fn new(nix_path: &str, is_dir: bool, thumb: ThumbnailState) -> Self {
        let base = base_name(nix_path).to_string();
        let ext = if is_dir {
            String::new()
        } else {
            match base.rfind('.') {
                Some(idx) if idx > 0 => base[idx + 1..].to_string(),
                _ => String::new(),
            }
        };
        Self {
            hash: path_hash(nix_path),
            nix_path: nix_path.to_string(),
            base,
            ext,
            is_dir,
            thumb,
            entity_id: None,
            file_hashes: None,
        }
    }
}

/// Reply to a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContents {
    pub directory: FileRecord,
    pub files: Vec<FileRecord>,
}
