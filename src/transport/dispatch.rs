//! Request dispatch for the authority.
//!
//! [`Authority`] turns one [`ClientMessage`] into at most one [`ServerMessage`]. Handler
//! failures never escape: they become `{error}` replies and the session carries on.

use crate::environment::EnvironmentSummary;
use crate::error::ApiError;
use crate::registry::{EnvironmentRegistry, SummaryEdit};
use crate::transport::hub::Hub;
use crate::transport::protocol::{
    ClientMessage, ConnectionInfo, HelloResponse, Outcome, Request, Response, ServerMessage,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct Authority {
    registry: Arc<EnvironmentRegistry>,
    hub: Arc<Hub>,
}

impl Authority {
    pub fn new(registry: Arc<EnvironmentRegistry>, hub: Arc<Hub>) -> Self {
        Self { registry, hub }
    }

    pub fn registry(&self) -> &Arc<EnvironmentRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Handle one inbound message for `session`.
    pub async fn process(&self, session: &ConnectionInfo, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Hello { id } => ServerMessage::Welcome {
                id,
                hello: HelloResponse {
                    client_id: session.id.clone(),
                    local_client: session.local_client,
                },
            },
            ClientMessage::Request { id, request } => {
                let action = request.name();
                let started = Instant::now();
                let outcome: Outcome = self.handle(session, request).await.into();
                match &outcome {
                    Outcome::Result(_) => debug!(
                        session = %session.id,
                        action,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Request handled"
                    ),
                    Outcome::Error(err) => warn!(
                        session = %session.id,
                        action,
                        kind = ?err.kind,
                        error = %err.message,
                        "Request failed"
                    ),
                }
                ServerMessage::Reply { id, outcome }
            }
        }
    }

    async fn handle(&self, session: &ConnectionInfo, request: Request) -> Result<Response, ApiError> {
        if request.is_privileged() && !session.local_client {
            return Err(ApiError::PermissionDenied(format!(
                "{} requires a local client",
                request.name()
            )));
        }

        match request {
            Request::GetSummaries => Ok(Response::Summaries(self.registry.summaries())),
            Request::CreateEnvironment { path } => {
                let registry = Arc::clone(&self.registry);
                let created: Option<EnvironmentSummary> =
                    tokio::task::spawn_blocking(move || registry.create(path))
                        .await
                        .map_err(|e| ApiError::Transport(format!("create task failed: {}", e)))??;
                Ok(Response::Summary(created))
            }
            Request::CloseEnvironment { env_id } => {
                self.registry.close(&env_id).await?;
                Ok(Response::Ack)
            }
            Request::UpdateEnvironment {
                env_id,
                name,
                icon,
                color,
            } => {
                let summary = self
                    .registry
                    .update_properties(&env_id, SummaryEdit { name, icon, color })?;
                Ok(Response::Summary(Some(summary)))
            }
            Request::GetAllTags { env_id } => {
                Ok(Response::Tags(self.registry.get(&env_id)?.all_tags()))
            }
            Request::GetAllEntities { env_id } => {
                Ok(Response::Entities(self.registry.get(&env_id)?.all_entities()))
            }
            Request::GetDirectoryContents { env_id, path } => {
                let env = self.registry.get(&env_id)?;
                Ok(Response::DirectoryContents(env.get_directory_contents(&path)?))
            }
            Request::AddTagsToFiles {
                env_id,
                tag_names,
                paths,
            } => {
                let env = self.registry.get(&env_id)?;
                Ok(Response::Batch(env.tag_files(&paths, &tag_names)?))
            }
            Request::RemoveTagsFromFiles {
                env_id,
                tag_ids,
                entity_ids,
            } => {
                let env = self.registry.get(&env_id)?;
                Ok(Response::Batch(env.untag_files(&entity_ids, &tag_ids)?))
            }
            Request::OpenFile { env_id, path } => {
                self.registry.get(&env_id)?.open_file(&path)?;
                Ok(Response::Ack)
            }
            Request::OpenInExplorer { env_id, path } => {
                self.registry.get(&env_id)?.open_in_explorer(&path)?;
                Ok(Response::Ack)
            }
            Request::RenameFile {
                env_id,
                old_path,
                new_path,
            } => {
                let env = self.registry.get(&env_id)?;
                Ok(Response::File(env.rename_file(&old_path, &new_path)?))
            }
            Request::RemoveFiles { env_id, paths } => {
                let env = self.registry.get(&env_id)?;
                Ok(Response::Batch(env.remove_files(&paths)?))
            }
            Request::RequestFileThumbnails { env_id, paths } => {
                self.registry.get(&env_id)?.request_thumbnails(&paths);
                Ok(Response::Ack)
            }
            Request::GetConnections => Ok(Response::Connections(self.hub.connections())),
        }
    }
}

/// Drive one session until its inbound side closes.
///
/// Messages are handled strictly in arrival order; pushes produced while handling a
/// request reach the session before that request's reply.
pub async fn run_session(
    authority: Arc<Authority>,
    session: ConnectionInfo,
    mut inbound: mpsc::UnboundedReceiver<ClientMessage>,
) {
    while let Some(message) = inbound.recv().await {
        let reply = authority.process(&session, message).await;
        if !authority.hub.send(&session.id, reply) {
            break;
        }
    }
    authority.hub.detach(&session.id);
}
