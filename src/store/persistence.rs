//! Sled-backed environment store.
//!
//! One sled database per environment, with a tree per record kind. Values are bincode.

use super::{EnvironmentMeta, EnvironmentStore, StorageBackend};
use crate::error::StorageError;
use crate::model::{Entity, Tag};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const META_TREE: &str = "env_meta";
const TAGS_TREE: &str = "tags";
const ENTITIES_TREE: &str = "entities";
const META_KEY: &[u8] = b"meta";

/// Tag plus its creation sequence number, so load order matches creation order
#[derive(Serialize, Deserialize)]
struct StoredTag {
    seq: u64,
    tag: Tag,
}

pub struct SledEnvironmentStore {
    db: sled::Db,
    meta: sled::Tree,
    tags: sled::Tree,
    entities: sled::Tree,
}

impl SledEnvironmentStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            meta: db.open_tree(META_TREE)?,
            tags: db.open_tree(TAGS_TREE)?,
            entities: db.open_tree(ENTITIES_TREE)?,
            db,
        })
    }
}

impl EnvironmentStore for SledEnvironmentStore {
    fn load_meta(&self) -> Result<Option<EnvironmentMeta>, StorageError> {
        match self.meta.get(META_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_meta(&self, meta: &EnvironmentMeta) -> Result<(), StorageError> {
        self.meta.insert(META_KEY, bincode::serialize(meta)?)?;
        Ok(())
    }

    fn load_tags(&self) -> Result<Vec<Tag>, StorageError> {
        let mut stored = Vec::new();
        for item in self.tags.iter() {
            let (_, bytes) = item?;
            stored.push(bincode::deserialize::<StoredTag>(&bytes)?);
        }
        stored.sort_by_key(|s| s.seq);
        Ok(stored.into_iter().map(|s| s.tag).collect())
    }

    fn put_tag(&self, tag: &Tag) -> Result<(), StorageError> {
        let seq = match self.tags.get(tag.id.as_bytes())? {
            Some(bytes) => bincode::deserialize::<StoredTag>(&bytes)?.seq,
            None => self.db.generate_id()?,
        };
        let stored = StoredTag {
            seq,
            tag: tag.clone(),
        };
        self.tags
            .insert(tag.id.as_bytes(), bincode::serialize(&stored)?)?;
        Ok(())
    }

    fn load_entities(&self) -> Result<Vec<Entity>, StorageError> {
        let mut entities = Vec::new();
        for item in self.entities.iter() {
            let (_, bytes) = item?;
            entities.push(bincode::deserialize(&bytes)?);
        }
        Ok(entities)
    }

    fn put_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        self.entities
            .insert(entity.id.as_bytes(), bincode::serialize(entity)?)?;
        Ok(())
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StorageError> {
        self.entities.remove(entity_id.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Opens a sled store at `<env data dir>/store`
#[derive(Debug, Default, Clone)]
pub struct SledBackend;

impl StorageBackend for SledBackend {
    fn open(
        &self,
        env_data_dir: &Path,
    ) -> Result<Arc<dyn super::EnvironmentStore>, StorageError> {
        Ok(Arc::new(SledEnvironmentStore::open(&env_data_dir.join("store"))?))
    }
}
