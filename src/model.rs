//! Tag/Entity model
//!
//! Tags and Entities are the durable half of an environment's state. A FileRecord's hash is
//! derived from its current path, so tag membership is recorded on an [`Entity`] instead.
//! The entity remembers which file hash it is attached to and is re-keyed, never recreated,
//! when that file moves.

use crate::error::ApiError;
use crate::identity::new_short_id;
use crate::types::{EntityId, FileHash, TagId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Colors assigned to new tags, cycling by tag count
pub const TAG_PALETTE: [&str; 8] = [
    "#3273dc", "#23d160", "#ffdd57", "#ff3860", "#209cee", "#b86bff", "#ff9f43", "#7a7a7a",
];

/// Tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub color: String,
}

/// Durable tagging identity for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    /// Hash of the file the entity is currently attached to
    pub hash: FileHash,
    pub tag_ids: BTreeSet<TagId>,
}

/// Result of resolving tag names
#[derive(Debug, Default)]
pub struct ResolvedTags {
    /// Ids for every requested name, deduplicated, in request order
    pub ids: Vec<TagId>,
    /// Tags that did not exist before
    pub created: Vec<Tag>,
}

/// In-memory tag/entity registry of one environment
#[derive(Debug, Default)]
pub struct TagEntityModel {
    tag_order: Vec<TagId>,
    tags: HashMap<TagId, Tag>,
    entities: HashMap<EntityId, Entity>,
    by_hash: HashMap<FileHash, EntityId>,
}

impl TagEntityModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the model from persisted tags and entities
    pub fn from_parts(tags: Vec<Tag>, entities: Vec<Entity>) -> Self {
        let mut model = Self::new();
        for tag in tags {
            model.tag_order.push(tag.id.clone());
            model.tags.insert(tag.id.clone(), tag);
        }
        for entity in entities {
            model.by_hash.insert(entity.hash.clone(), entity.id.clone());
            model.entities.insert(entity.id.clone(), entity);
        }
        model
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.tag_order
            .iter()
            .filter_map(|id| self.tags.get(id).cloned())
            .collect()
    }

    pub fn tag(&self, id: &str) -> Option<&Tag> {
        self.tags.get(id)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        let wanted = name.trim().to_lowercase();
        self.tags.values().find(|t| t.name.to_lowercase() == wanted)
    }

    pub fn entities(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_for_hash(&self, hash: &str) -> Option<&Entity> {
        self.by_hash.get(hash).and_then(|id| self.entities.get(id))
    }

    /// Resolve tag names to ids, drafting tags for names never seen before.
    ///
    /// Drafted tags are returned in `created` and stay out of the model until they are
    /// passed to [`Self::commit_tags`].
    pub fn resolve_tags(&self, names: &[String]) -> Result<ResolvedTags, ApiError> {
        let mut resolved = ResolvedTags::default();
        for raw in names {
            let name = raw.trim();
            if name.is_empty() {
                return Err(ApiError::Validation("Tag names cannot be empty".to_string()));
            }
            let wanted = name.to_lowercase();
            let existing = self
                .tag_by_name(name)
                .or_else(|| resolved.created.iter().find(|t| t.name.to_lowercase() == wanted))
                .map(|tag| tag.id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let drafted = &resolved.created;
                    let tag = Tag {
                        id: self.unused_id(|m, id| {
                            m.tags.contains_key(id) || drafted.iter().any(|t| t.id == id)
                        }),
                        name: name.to_string(),
                        color: TAG_PALETTE[(self.tag_order.len() + drafted.len()) % TAG_PALETTE.len()]
                            .to_string(),
                    };
                    let id = tag.id.clone();
                    resolved.created.push(tag);
                    id
                }
            };
            if !resolved.ids.contains(&id) {
                resolved.ids.push(id);
            }
        }
        Ok(resolved)
    }

    /// Add persisted tags to the model, keeping creation order.
    pub fn commit_tags(&mut self, tags: impl IntoIterator<Item = Tag>) {
        for tag in tags {
            if !self.tags.contains_key(&tag.id) {
                self.tag_order.push(tag.id.clone());
            }
            self.tags.insert(tag.id.clone(), tag);
        }
    }

    /// Copy of the entity attached to `hash`, or a fresh unsaved one with an unused id.
    ///
    /// Nothing changes until the draft is passed to [`Self::commit`], so callers can persist
    /// first and only commit what was written.
    pub fn draft_for_hash(&self, hash: &str) -> Entity {
        match self.entity_for_hash(hash) {
            Some(entity) => entity.clone(),
            None => Entity {
                id: self.unused_id(|m, id| m.entities.contains_key(id)),
                hash: hash.to_string(),
                tag_ids: BTreeSet::new(),
            },
        }
    }

    /// Insert or replace an entity, updating the hash index.
    pub fn commit(&mut self, entity: Entity) {
        if let Some(previous) = self.entities.get(&entity.id) {
            if previous.hash != entity.hash {
                self.by_hash.remove(&previous.hash);
            }
        }
        self.by_hash.insert(entity.hash.clone(), entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Drop the entity attached to a removed file.
    pub fn remove_for_hash(&mut self, hash: &str) -> Option<Entity> {
        let id = self.by_hash.get(hash)?.clone();
        self.remove_entity(&id)
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        if self.by_hash.get(&entity.hash).map(String::as_str) == Some(id) {
            self.by_hash.remove(&entity.hash);
        }
        Some(entity)
    }

    fn unused_id(&self, taken: impl Fn(&Self, &str) -> bool) -> String {
        let mut id = new_short_id();
        while taken(self, &id) {
            id = new_short_id();
        }
        id
    }
}
