//! Client end of a connection: handshake, request correlation and push delivery.

use crate::client::bus::EventBus;
use crate::config::ClientConfig;
use crate::environment::{DirectoryContents, EnvironmentSummary, FileRecord};
use crate::error::ApiError;
use crate::model::{Entity, Tag};
use crate::transport::connector::{Connector, Link};
use crate::transport::protocol::{
    BatchOutcome, ClientMessage, ConnectionInfo, HelloResponse, Outcome, Request, RequestId,
    Response, ServerMessage,
};
use crate::types::{EntityId, TagId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info};

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Outcome>>>>;

const HELLO_ID: RequestId = 0;

pub struct Client {
    /// Taken on close; dropping the sender ends the session
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    pending: Pending,
    next_id: AtomicU64,
    hello: HelloResponse,
    request_timeout: Option<Duration>,
    connected: watch::Receiver<bool>,
}

impl Client {
    /// Connect and complete the handshake within `handshake_timeout_ms`.
    ///
    /// Pushes received from then on are published on `bus`.
    pub async fn connect(
        connector: &dyn Connector,
        bus: Arc<EventBus>,
        config: &ClientConfig,
    ) -> Result<Self, ApiError> {
        let Link {
            outbound,
            mut inbound,
        } = connector.connect().await?;
        outbound
            .send(ClientMessage::Hello { id: HELLO_ID })
            .map_err(|_| ApiError::Transport("Connection closed before handshake".to_string()))?;

        let limit = Duration::from_millis(config.handshake_timeout_ms);
        let handshake = async {
            while let Some(message) = inbound.recv().await {
                match message {
                    ServerMessage::Welcome { hello, .. } => return Ok(hello),
                    ServerMessage::Push { event } => bus.publish(&event),
                    ServerMessage::Reply { id, .. } => debug!(id, "Reply before handshake"),
                }
            }
            Err(ApiError::Transport(
                "Connection closed during handshake".to_string(),
            ))
        };
        let hello = timeout(limit, handshake).await.map_err(|_| {
            ApiError::Timeout(format!(
                "No handshake reply within {} ms",
                config.handshake_timeout_ms
            ))
        })??;
        info!(client_id = %hello.client_id, local = hello.local_client, "Connected");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (connected_tx, connected) = watch::channel(true);
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    ServerMessage::Reply { id, outcome } => {
                        match reader_pending.lock().remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(outcome);
                            }
                            None => debug!(id, "Reply for unknown request"),
                        }
                    }
                    ServerMessage::Push { event } => bus.publish(&event),
                    ServerMessage::Welcome { .. } => {}
                }
            }
            // Flag first so a request registered after the drain sees the closed state
            let _ = connected_tx.send(false);
            reader_pending.lock().clear();
            info!("Disconnected");
        });

        Ok(Self {
            outbound: Mutex::new(Some(outbound)),
            pending,
            next_id: AtomicU64::new(HELLO_ID + 1),
            hello,
            request_timeout: config.request_timeout_ms.map(Duration::from_millis),
            connected,
        })
    }

    pub fn hello(&self) -> &HelloResponse {
        &self.hello
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the link has dropped.
    pub async fn closed(&self) {
        let mut connected = self.connected.clone();
        while *connected.borrow() {
            if connected.changed().await.is_err() {
                break;
            }
        }
    }

    /// Close the link and wait until the authority has let go of it.
    pub async fn close(&self) {
        self.outbound.lock().take();
        self.closed().await;
    }

    /// Send a request and wait for its reply.
    pub async fn request(&self, request: Request) -> Result<Response, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let action = request.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = match self.outbound.lock().as_ref() {
            Some(outbound) => outbound.send(ClientMessage::Request { id, request }).is_ok(),
            None => false,
        };
        if !sent || !self.is_connected() {
            self.pending.lock().remove(&id);
            return Err(ApiError::Transport(format!(
                "Connection closed, {} not sent",
                action
            )));
        }

        let received = match self.request_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(ApiError::Timeout(format!(
                        "{} got no reply within {} ms",
                        action,
                        limit.as_millis()
                    )));
                }
            },
            None => rx.await,
        };

        match received {
            Ok(Outcome::Result(response)) => Ok(response),
            Ok(Outcome::Error(payload)) => Err(payload.into()),
            Err(_) => Err(ApiError::Transport(format!(
                "Connection closed before {} was answered",
                action
            ))),
        }
    }

    pub async fn get_summaries(&self) -> Result<Vec<EnvironmentSummary>, ApiError> {
        match self.request(Request::GetSummaries).await? {
            Response::Summaries(list) => Ok(list),
            other => Err(unexpected("getSummaries", other)),
        }
    }

    pub async fn create_environment(
        &self,
        path: Option<PathBuf>,
    ) -> Result<Option<EnvironmentSummary>, ApiError> {
        match self.request(Request::CreateEnvironment { path }).await? {
            Response::Summary(summary) => Ok(summary),
            other => Err(unexpected("createEnvironment", other)),
        }
    }

    pub async fn close_environment(&self, env_id: &str) -> Result<(), ApiError> {
        self.request(Request::CloseEnvironment {
            env_id: env_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn update_environment(
        &self,
        env_id: &str,
        name: Option<String>,
        icon: Option<String>,
        color: Option<String>,
    ) -> Result<EnvironmentSummary, ApiError> {
        let request = Request::UpdateEnvironment {
            env_id: env_id.to_string(),
            name,
            icon,
            color,
        };
        match self.request(request).await? {
            Response::Summary(Some(summary)) => Ok(summary),
            other => Err(unexpected("updateEnvironment", other)),
        }
    }

    pub async fn open_file(&self, env_id: &str, path: &str) -> Result<(), ApiError> {
        self.request(Request::OpenFile {
            env_id: env_id.to_string(),
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn open_in_explorer(&self, env_id: &str, path: &str) -> Result<(), ApiError> {
        self.request(Request::OpenInExplorer {
            env_id: env_id.to_string(),
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn get_all_tags(&self, env_id: &str) -> Result<Vec<Tag>, ApiError> {
        match self
            .request(Request::GetAllTags {
                env_id: env_id.to_string(),
            })
            .await?
        {
            Response::Tags(tags) => Ok(tags),
            other => Err(unexpected("getAllTags", other)),
        }
    }

    pub async fn get_all_entities(&self, env_id: &str) -> Result<Vec<Entity>, ApiError> {
        match self
            .request(Request::GetAllEntities {
                env_id: env_id.to_string(),
            })
            .await?
        {
            Response::Entities(entities) => Ok(entities),
            other => Err(unexpected("getAllEntities", other)),
        }
    }

    pub async fn get_directory_contents(
        &self,
        env_id: &str,
        path: &str,
    ) -> Result<DirectoryContents, ApiError> {
        match self
            .request(Request::GetDirectoryContents {
                env_id: env_id.to_string(),
                path: path.to_string(),
            })
            .await?
        {
            Response::DirectoryContents(contents) => Ok(contents),
            other => Err(unexpected("getDirectoryContents", other)),
        }
    }

    pub async fn add_tags_to_files(
        &self,
        env_id: &str,
        tag_names: Vec<String>,
        paths: Vec<String>,
    ) -> Result<BatchOutcome, ApiError> {
        let request = Request::AddTagsToFiles {
            env_id: env_id.to_string(),
            tag_names,
            paths,
        };
        match self.request(request).await? {
            Response::Batch(outcome) => Ok(outcome),
            other => Err(unexpected("addTagsToFiles", other)),
        }
    }

    pub async fn remove_tags_from_files(
        &self,
        env_id: &str,
        tag_ids: Vec<TagId>,
        entity_ids: Vec<EntityId>,
    ) -> Result<BatchOutcome, ApiError> {
        let request = Request::RemoveTagsFromFiles {
            env_id: env_id.to_string(),
            tag_ids,
            entity_ids,
        };
        match self.request(request).await? {
            Response::Batch(outcome) => Ok(outcome),
            other => Err(unexpected("removeTagsFromFiles", other)),
        }
    }

    pub async fn rename_file(
        &self,
        env_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<FileRecord, ApiError> {
        let request = Request::RenameFile {
            env_id: env_id.to_string(),
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        };
        match self.request(request).await? {
            Response::File(file) => Ok(file),
            other => Err(unexpected("renameFile", other)),
        }
    }

    pub async fn remove_files(&self, env_id: &str, paths: Vec<String>) -> Result<BatchOutcome, ApiError> {
        let request = Request::RemoveFiles {
            env_id: env_id.to_string(),
            paths,
        };
        match self.request(request).await? {
            Response::Batch(outcome) => Ok(outcome),
            other => Err(unexpected("removeFiles", other)),
        }
    }

    pub async fn request_file_thumbnails(&self, env_id: &str, paths: Vec<String>) -> Result<(), ApiError> {
        self.request(Request::RequestFileThumbnails {
            env_id: env_id.to_string(),
            paths,
        })
        .await
        .map(|_| ())
    }

    pub async fn get_connections(&self) -> Result<Vec<ConnectionInfo>, ApiError> {
        match self.request(Request::GetConnections).await? {
            Response::Connections(list) => Ok(list),
            other => Err(unexpected("getConnections", other)),
        }
    }
}

fn unexpected(action: &str, response: Response) -> ApiError {
    ApiError::Transport(format!("Unexpected reply to {}: {:?}", action, response))
}
