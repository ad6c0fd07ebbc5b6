//! Environment Store
//!
//! Durable storage for everything about an environment that must survive a restart:
//! its identity and display properties, its tags, and its entities. FileRecords are
//! never persisted; they are rebuilt from the filesystem on demand.

pub mod memory;
pub mod persistence;

use crate::error::StorageError;
use crate::model::{Entity, Tag};
use crate::types::EnvId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Persisted environment identity and display properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMeta {
    pub id: EnvId,
    pub name: String,
    pub icon: String,
    pub color: String,
}

/// EnvironmentStore interface
pub trait EnvironmentStore: Send + Sync {
    fn load_meta(&self) -> Result<Option<EnvironmentMeta>, StorageError>;
    fn save_meta(&self, meta: &EnvironmentMeta) -> Result<(), StorageError>;

    /// All tags in creation order
    fn load_tags(&self) -> Result<Vec<Tag>, StorageError>;
    fn put_tag(&self, tag: &Tag) -> Result<(), StorageError>;

    fn load_entities(&self) -> Result<Vec<Entity>, StorageError>;
    fn put_entity(&self, entity: &Entity) -> Result<(), StorageError>;
    fn delete_entity(&self, entity_id: &str) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}

/// Opens the store belonging to one environment data directory
pub trait StorageBackend: Send + Sync {
    fn open(&self, env_data_dir: &Path) -> Result<Arc<dyn EnvironmentStore>, StorageError>;
}
