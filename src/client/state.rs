//! Normalized client-side state.

use crate::environment::{EnvironmentSummary, FileRecord};
use crate::model::{Entity, Tag};
use crate::transport::protocol::{ConnectionInfo, HelloResponse};
use crate::types::{EntityId, EnvId, FileHash, SessionId, TagId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    /// Every selected tag must be present
    #[default]
    All,
    /// At least one selected tag must be present
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseState {
    pub path: String,
}

impl Default for BrowseState {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub selected_tag_ids: Vec<TagId>,
    pub tag_filter: String,
    pub match_mode: MatchMode,
}

/// Everything a client knows about one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentState {
    pub summary: EnvironmentSummary,
    /// Tag ids in authority order
    pub tag_ids: Vec<TagId>,
    pub tag_map: HashMap<TagId, Tag>,
    pub entity_map: HashMap<EntityId, Entity>,
    pub file_map: HashMap<FileHash, FileRecord>,
    pub browse: BrowseState,
    pub search: SearchState,
}

impl EnvironmentState {
    pub fn new(summary: EnvironmentSummary) -> Self {
        Self {
            summary,
            tag_ids: Vec::new(),
            tag_map: HashMap::new(),
            entity_map: HashMap::new(),
            file_map: HashMap::new(),
            browse: BrowseState::default(),
            search: SearchState::default(),
        }
    }

    /// Tags in authority order
    pub fn tags(&self) -> Vec<&Tag> {
        self.tag_ids
            .iter()
            .filter_map(|id| self.tag_map.get(id))
            .collect()
    }

    pub fn entity_for_hash(&self, hash: &str) -> Option<&Entity> {
        self.entity_map.values().find(|e| e.hash == hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    pub client: Option<HelloResponse>,
    pub connection_map: BTreeMap<SessionId, ConnectionInfo>,
    /// Open environments in authority order
    pub env_ids: Vec<EnvId>,
    pub env_map: HashMap<EnvId, EnvironmentState>,
}
