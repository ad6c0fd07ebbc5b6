//! In-memory environment store, used by tests and ephemeral sessions.

use super::{EnvironmentMeta, EnvironmentStore, StorageBackend};
use crate::error::StorageError;
use crate::model::{Entity, Tag};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryEnvironmentStore {
    meta: RwLock<Option<EnvironmentMeta>>,
    tags: RwLock<Vec<Tag>>,
    entities: RwLock<BTreeMap<String, Entity>>,
}

impl MemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnvironmentStore for MemoryEnvironmentStore {
    fn load_meta(&self) -> Result<Option<EnvironmentMeta>, StorageError> {
        Ok(self.meta.read().clone())
    }

    fn save_meta(&self, meta: &EnvironmentMeta) -> Result<(), StorageError> {
        *self.meta.write() = Some(meta.clone());
        Ok(())
    }

    fn load_tags(&self) -> Result<Vec<Tag>, StorageError> {
        Ok(self.tags.read().clone())
    }

    fn put_tag(&self, tag: &Tag) -> Result<(), StorageError> {
        let mut tags = self.tags.write();
        match tags.iter_mut().find(|t| t.id == tag.id) {
            Some(existing) => *existing = tag.clone(),
            None => tags.push(tag.clone()),
        }
        Ok(())
    }

    fn load_entities(&self) -> Result<Vec<Entity>, StorageError> {
        Ok(self.entities.read().values().cloned().collect())
    }

    fn put_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        self.entities
            .write()
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StorageError> {
        self.entities.write().remove(entity_id);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Hands out one shared in-memory store per environment directory, so closing and
/// reopening an environment within a process keeps its data.
#[derive(Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<PathBuf, Arc<MemoryEnvironmentStore>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn open(&self, env_data_dir: &Path) -> Result<Arc<dyn EnvironmentStore>, StorageError> {
        let store = self
            .stores
            .lock()
            .entry(env_data_dir.to_path_buf())
            .or_default()
            .clone();
        Ok(store)
    }
}
