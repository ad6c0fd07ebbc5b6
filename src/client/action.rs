//! Actions understood by the client reducer.

use crate::client::state::MatchMode;
use crate::environment::{EnvironmentSummary, FileRecord};
use crate::model::{Entity, Tag};
use crate::transport::protocol::{ConnectionInfo, HashMove, HelloResponse, ThumbUpdate};
use crate::types::{EntityId, EnvId, FileHash, SessionId, TagId};

#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    // Global
    SetClientDetails(HelloResponse),
    SetConnectionList(Vec<ConnectionInfo>),
    AddConnection(ConnectionInfo),
    RemoveConnection(SessionId),
    UpdateSummaries(Vec<EnvironmentSummary>),

    // Environment scoped
    UpdateSummary(EnvironmentSummary),
    SetAllTags(Vec<Tag>),
    AddNewTags(Vec<Tag>),
    SetAllEntities(Vec<Entity>),
    TagFiles {
        hashes: Vec<FileHash>,
        entity_ids: Vec<EntityId>,
        tag_ids: Vec<TagId>,
    },
    UntagFiles {
        entity_ids: Vec<EntityId>,
        tag_ids: Vec<TagId>,
    },
    RemoveMultipleFiles(Vec<FileHash>),
    RenameFile {
        old_hash: FileHash,
        file: FileRecord,
        descendants: Vec<HashMove>,
    },
    SetDirectoryContent {
        directory: FileHash,
        file_hashes: Vec<FileHash>,
    },
    SetMultipleFileDetails(Vec<FileRecord>),
    UpdateThumbStates(Vec<ThumbUpdate>),
    BrowseChangePath(String),
    SearchChangeTagSelection(Vec<TagId>),
    SearchChangeMatchMode(MatchMode),
    SearchChangeTagFilter(String),
}

impl ActionPayload {
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            ActionPayload::SetClientDetails(_)
                | ActionPayload::SetConnectionList(_)
                | ActionPayload::AddConnection(_)
                | ActionPayload::RemoveConnection(_)
                | ActionPayload::UpdateSummaries(_)
        )
    }
}

/// A payload plus the environment it applies to, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub env_id: Option<EnvId>,
    pub payload: ActionPayload,
}

impl Action {
    pub fn global(payload: ActionPayload) -> Self {
        Self {
            env_id: None,
            payload,
        }
    }

    pub fn env(env_id: impl Into<EnvId>, payload: ActionPayload) -> Self {
        Self {
            env_id: Some(env_id.into()),
            payload,
        }
    }
}
