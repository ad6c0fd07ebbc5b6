//! Wire protocol
//!
//! Every message is a tagged enum serialized as JSON. Clients send [`ClientMessage`]s,
//! the authority answers with [`ServerMessage`]s. Requests are correlated with their
//! replies by a client-chosen numeric id; pushes carry no id.

use crate::environment::{DirectoryContents, EnvironmentSummary, FileRecord, ThumbnailState};
use crate::error::{ApiError, ErrorPayload};
use crate::model::{Entity, Tag};
use crate::types::{EntityId, EnvId, FileHash, SessionId, TagId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type RequestId = u64;

/// Client → authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Hello { id: RequestId },
    Request { id: RequestId, request: Request },
}

/// Authority → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome { id: RequestId, hello: HelloResponse },
    Reply { id: RequestId, outcome: Outcome },
    Push { event: PushEvent },
}

/// Handshake reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponse {
    pub client_id: SessionId,
    /// Whether this client runs on the authority's machine and may use privileged actions
    pub local_client: bool,
}

/// Request actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    GetSummaries,
    CreateEnvironment {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    CloseEnvironment {
        env_id: EnvId,
    },
    UpdateEnvironment {
        env_id: EnvId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        icon: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    GetAllTags {
        env_id: EnvId,
    },
    GetAllEntities {
        env_id: EnvId,
    },
    GetDirectoryContents {
        env_id: EnvId,
        path: String,
    },
    AddTagsToFiles {
        env_id: EnvId,
        tag_names: Vec<String>,
        paths: Vec<String>,
    },
    RemoveTagsFromFiles {
        env_id: EnvId,
        tag_ids: Vec<TagId>,
        entity_ids: Vec<EntityId>,
    },
    OpenFile {
        env_id: EnvId,
        path: String,
    },
    OpenInExplorer {
        env_id: EnvId,
        path: String,
    },
    RenameFile {
        env_id: EnvId,
        old_path: String,
        new_path: String,
    },
    RemoveFiles {
        env_id: EnvId,
        paths: Vec<String>,
    },
    RequestFileThumbnails {
        env_id: EnvId,
        paths: Vec<String>,
    },
    GetConnections,
}

impl Request {
    /// Actions only a local (privileged) client may perform
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Request::CreateEnvironment { .. }
                | Request::CloseEnvironment { .. }
                | Request::OpenFile { .. }
                | Request::OpenInExplorer { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::GetSummaries => "getSummaries",
            Request::CreateEnvironment { .. } => "createEnvironment",
            Request::CloseEnvironment { .. } => "closeEnvironment",
            Request::UpdateEnvironment { .. } => "updateEnvironment",
            Request::GetAllTags { .. } => "getAllTags",
            Request::GetAllEntities { .. } => "getAllEntities",
            Request::GetDirectoryContents { .. } => "getDirectoryContents",
            Request::AddTagsToFiles { .. } => "addTagsToFiles",
            Request::RemoveTagsFromFiles { .. } => "removeTagsFromFiles",
            Request::OpenFile { .. } => "openFile",
            Request::OpenInExplorer { .. } => "openInExplorer",
            Request::RenameFile { .. } => "renameFile",
            Request::RemoveFiles { .. } => "removeFiles",
            Request::RequestFileThumbnails { .. } => "requestFileThumbnails",
            Request::GetConnections => "getConnections",
        }
    }
}

/// Successful reply bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Response {
    Ack,
    Summaries(Vec<EnvironmentSummary>),
    /// `None` when environment creation was cancelled at the path chooser
    Summary(Option<EnvironmentSummary>),
    Tags(Vec<Tag>),
    Entities(Vec<Entity>),
    DirectoryContents(DirectoryContents),
    File(FileRecord),
    Batch(BatchOutcome),
    Connections(Vec<ConnectionInfo>),
}

/// `{result}` or `{error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Result(Response),
    Error(ErrorPayload),
}

impl From<Result<Response, ApiError>> for Outcome {
    fn from(result: Result<Response, ApiError>) -> Self {
        match result {
            Ok(response) => Outcome::Result(response),
            Err(err) => Outcome::Error(err.to_payload()),
        }
    }
}

/// Result of one item in a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// The path or entity id the item was addressed by
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

/// Per-item outcomes of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn ok(&mut self, target: impl Into<String>) {
        self.items.push(ItemOutcome {
            target: target.into(),
            error: None,
        });
    }

    pub fn failed(&mut self, target: impl Into<String>, err: &ApiError) {
        self.items.push(ItemOutcome {
            target: target.into(),
            error: Some(err.to_payload()),
        });
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_none()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| i.error.is_some())
    }
}

/// One connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: SessionId,
    pub local_client: bool,
    #[serde(default)]
    pub address: Option<String>,
    /// RFC 3339 timestamp
    pub connected_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbUpdate {
    pub hash: FileHash,
    pub thumb: ThumbnailState,
}

/// A file that changed hash because an ancestor directory was renamed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashMove {
    pub old_hash: FileHash,
    pub new_hash: FileHash,
}

/// Authority-initiated deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all_fields = "camelCase")]
pub enum PushEvent {
    UpdateEnvSummaries(Vec<EnvironmentSummary>),
    UpdateEnvSummary(EnvironmentSummary),
    EnvAddTags {
        env_id: EnvId,
        tags: Vec<Tag>,
    },
    EnvTagFiles {
        env_id: EnvId,
        hashes: Vec<FileHash>,
        entity_ids: Vec<EntityId>,
        tag_ids: Vec<TagId>,
    },
    EnvUntagFiles {
        env_id: EnvId,
        entity_ids: Vec<EntityId>,
        tag_ids: Vec<TagId>,
    },
    EnvRemoveFiles {
        env_id: EnvId,
        hashes: Vec<FileHash>,
    },
    EnvRenameFile {
        env_id: EnvId,
        old_hash: FileHash,
        file: FileRecord,
        /// Files under a renamed directory, each moved to its new hash
        #[serde(default)]
        descendants: Vec<HashMove>,
    },
    EnvThumbUpdates {
        env_id: EnvId,
        updates: Vec<ThumbUpdate>,
    },
    AddConnection(ConnectionInfo),
    RemoveConnection(SessionId),
}

/// Enumerated push kinds, used as event bus keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UpdateEnvSummaries,
    UpdateEnvSummary,
    EnvAddTags,
    EnvTagFiles,
    EnvUntagFiles,
    EnvRemoveFiles,
    EnvRenameFile,
    EnvThumbUpdates,
    AddConnection,
    RemoveConnection,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::UpdateEnvSummaries,
        EventKind::UpdateEnvSummary,
        EventKind::EnvAddTags,
        EventKind::EnvTagFiles,
        EventKind::EnvUntagFiles,
        EventKind::EnvRemoveFiles,
        EventKind::EnvRenameFile,
        EventKind::EnvThumbUpdates,
        EventKind::AddConnection,
        EventKind::RemoveConnection,
    ];
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::UpdateEnvSummaries(_) => EventKind::UpdateEnvSummaries,
            PushEvent::UpdateEnvSummary(_) => EventKind::UpdateEnvSummary,
            PushEvent::EnvAddTags { .. } => EventKind::EnvAddTags,
            PushEvent::EnvTagFiles { .. } => EventKind::EnvTagFiles,
            PushEvent::EnvUntagFiles { .. } => EventKind::EnvUntagFiles,
            PushEvent::EnvRemoveFiles { .. } => EventKind::EnvRemoveFiles,
            PushEvent::EnvRenameFile { .. } => EventKind::EnvRenameFile,
            PushEvent::EnvThumbUpdates { .. } => EventKind::EnvThumbUpdates,
            PushEvent::AddConnection(_) => EventKind::AddConnection,
            PushEvent::RemoveConnection(_) => EventKind::RemoveConnection,
        }
    }

    /// Environment the event is scoped to, if any
    pub fn env_id(&self) -> Option<&str> {
        match self {
            PushEvent::UpdateEnvSummary(summary) => Some(&summary.id),
            PushEvent::EnvAddTags { env_id, .. }
            | PushEvent::EnvTagFiles { env_id, .. }
            | PushEvent::EnvUntagFiles { env_id, .. }
            | PushEvent::EnvRemoveFiles { env_id, .. }
            | PushEvent::EnvRenameFile { env_id, .. }
            | PushEvent::EnvThumbUpdates { env_id, .. } => Some(env_id),
            PushEvent::UpdateEnvSummaries(_)
            | PushEvent::AddConnection(_)
            | PushEvent::RemoveConnection(_) => None,
        }
    }
}
