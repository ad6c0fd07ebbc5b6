//! Keeping a [`ClientStateStore`] in step with the authority.
//!
//! Pushes are turned into reducer actions as they arrive. After every (re)connect the
//! store is rebuilt from a full bootstrap: summaries, then tags and entities for every
//! open environment. Nothing is replayed.

use crate::client::action::{Action, ActionPayload};
use crate::client::batcher::{ThumbnailBatcher, ThumbnailSink};
use crate::client::bus::{EventBus, SubscriptionId};
use crate::client::store::ClientStateStore;
use crate::config::ClientConfig;
use crate::environment::DirectoryContents;
use crate::error::ApiError;
use crate::transport::client::Client;
use crate::transport::connector::Connector;
use crate::transport::protocol::PushEvent;
use crate::types::EnvId;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reducer action for a push
pub fn action_for_push(event: PushEvent) -> Action {
    match event {
        PushEvent::UpdateEnvSummaries(summaries) => {
            Action::global(ActionPayload::UpdateSummaries(summaries))
        }
        PushEvent::UpdateEnvSummary(summary) => {
            Action::env(summary.id.clone(), ActionPayload::UpdateSummary(summary))
        }
        PushEvent::EnvAddTags { env_id, tags } => Action::env(env_id, ActionPayload::AddNewTags(tags)),
        PushEvent::EnvTagFiles {
            env_id,
            hashes,
            entity_ids,
            tag_ids,
        } => Action::env(
            env_id,
            ActionPayload::TagFiles {
                hashes,
                entity_ids,
                tag_ids,
            },
        ),
        PushEvent::EnvUntagFiles {
            env_id,
            entity_ids,
            tag_ids,
        } => Action::env(
            env_id,
            ActionPayload::UntagFiles {
                entity_ids,
                tag_ids,
            },
        ),
        PushEvent::EnvRemoveFiles { env_id, hashes } => {
            Action::env(env_id, ActionPayload::RemoveMultipleFiles(hashes))
        }
        PushEvent::EnvRenameFile {
            env_id,
            old_hash,
            file,
            descendants,
        } => Action::env(
            env_id,
            ActionPayload::RenameFile {
                old_hash,
                file,
                descendants,
            },
        ),
        PushEvent::EnvThumbUpdates { env_id, updates } => {
            Action::env(env_id, ActionPayload::UpdateThumbStates(updates))
        }
        PushEvent::AddConnection(info) => Action::global(ActionPayload::AddConnection(info)),
        PushEvent::RemoveConnection(id) => Action::global(ActionPayload::RemoveConnection(id)),
    }
}

/// Applies pushes to a store, holding them back while a bootstrap snapshot is in flight.
///
/// Held pushes are replayed after the snapshot so none of them is lost to an older
/// `SetAllEntities` or to an environment the store does not know yet.
pub struct PushGate {
    store: Arc<ClientStateStore>,
    held: Mutex<Option<Vec<Action>>>,
}

impl PushGate {
    pub fn new(store: Arc<ClientStateStore>) -> Self {
        Self {
            store,
            held: Mutex::new(None),
        }
    }

    pub fn apply(&self, action: Action) {
        let mut held = self.held.lock();
        match held.as_mut() {
            Some(queue) => queue.push(action),
            None => self.store.dispatch(action),
        }
    }

    /// Start holding pushes back.
    pub fn hold(&self) {
        self.held.lock().get_or_insert_with(Vec::new);
    }

    /// Apply `snapshot`, then every push held since [`Self::hold`], and stop holding.
    pub fn release(&self, snapshot: Vec<Action>) {
        let mut held = self.held.lock();
        let queued = held.take().unwrap_or_default();
        if !queued.is_empty() {
            debug!(count = queued.len(), "Replaying pushes held during bootstrap");
        }
        self.store.dispatch_all(snapshot);
        self.store.dispatch_all(queued);
    }
}

/// Route every push on `bus` through `gate`.
pub fn bind_store(bus: &EventBus, gate: Arc<PushGate>) -> Vec<SubscriptionId> {
    bus.subscribe_all(Arc::new(move |event: &PushEvent| {
        gate.apply(action_for_push(event.clone()));
    }))
}

/// Fetch the authority's current state as the actions that rebuild a store from it.
pub async fn snapshot(client: &Client) -> Result<Vec<Action>, ApiError> {
    let summaries = client.get_summaries().await?;
    let connections = client.get_connections().await?;
    let env_ids: Vec<EnvId> = summaries.iter().map(|s| s.id.clone()).collect();

    let mut actions = vec![
        Action::global(ActionPayload::SetClientDetails(client.hello().clone())),
        Action::global(ActionPayload::UpdateSummaries(summaries)),
        Action::global(ActionPayload::SetConnectionList(connections)),
    ];
    for env_id in &env_ids {
        let tags = client.get_all_tags(env_id).await?;
        let entities = client.get_all_entities(env_id).await?;
        actions.push(Action::env(env_id.clone(), ActionPayload::SetAllTags(tags)));
        actions.push(Action::env(env_id.clone(), ActionPayload::SetAllEntities(entities)));
    }
    info!(environments = env_ids.len(), "Fetched client state snapshot");
    Ok(actions)
}

/// Rebuild the store from the authority's current state, replaying pushes held by `gate`.
pub async fn bootstrap(client: &Client, gate: &PushGate) -> Result<(), ApiError> {
    gate.hold();
    match snapshot(client).await {
        Ok(actions) => {
            gate.release(actions);
            Ok(())
        }
        Err(e) => {
            gate.release(Vec::new());
            Err(e)
        }
    }
}

/// List a directory and merge the result into the store.
pub async fn browse(
    client: &Client,
    store: &ClientStateStore,
    env_id: &str,
    path: &str,
) -> Result<DirectoryContents, ApiError> {
    let contents = client.get_directory_contents(env_id, path).await?;
    let mut files = contents.files.clone();
    files.push(contents.directory.clone());
    store.dispatch_all([
        Action::env(env_id, ActionPayload::SetMultipleFileDetails(files)),
        Action::env(
            env_id,
            ActionPayload::SetDirectoryContent {
                directory: contents.directory.hash.clone(),
                file_hashes: contents.files.iter().map(|f| f.hash.clone()).collect(),
            },
        ),
        Action::env(
            env_id,
            ActionPayload::BrowseChangePath(contents.directory.nix_path.clone()),
        ),
    ]);
    Ok(contents)
}

/// A client connection plus the state it keeps in sync, with reconnect support
pub struct SyncedClient {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    bus: Arc<EventBus>,
    store: Arc<ClientStateStore>,
    gate: Arc<PushGate>,
    current: RwLock<Option<Arc<Client>>>,
    batcher: Mutex<Option<Arc<ThumbnailBatcher>>>,
    subscriptions: Vec<SubscriptionId>,
}

impl SyncedClient {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(ClientStateStore::new());
        let gate = Arc::new(PushGate::new(Arc::clone(&store)));
        let subscriptions = bind_store(&bus, Arc::clone(&gate));
        Self {
            connector,
            config,
            bus,
            store,
            gate,
            current: RwLock::new(None),
            batcher: Mutex::new(None),
            subscriptions,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<ClientStateStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The live connection, if any
    pub fn client(&self) -> Result<Arc<Client>, ApiError> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| ApiError::Transport("Not connected".to_string()))
    }

    /// Reset already-requested thumbnails on this batcher whenever the session reconnects.
    pub fn attach_batcher(&self, batcher: Arc<ThumbnailBatcher>) {
        *self.batcher.lock() = Some(batcher);
    }

    /// Connect, bootstrap, and make the connection current.
    pub async fn connect(&self) -> Result<Arc<Client>, ApiError> {
        // Pushes can arrive as soon as the handshake completes
        self.gate.hold();
        let connected = Client::connect(self.connector.as_ref(), Arc::clone(&self.bus), &self.config).await;
        let client = match connected {
            Ok(client) => Arc::new(client),
            Err(e) => {
                self.gate.release(Vec::new());
                return Err(e);
            }
        };
        bootstrap(&client, &self.gate).await?;
        if let Some(batcher) = self.batcher.lock().as_ref() {
            batcher.reset();
        }
        *self.current.write() = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Drop the current connection.
    pub async fn disconnect(&self) {
        let current = self.current.write().take();
        if let Some(client) = current {
            client.close().await;
        }
    }

    /// Stay connected: reconnect with `retry` between attempts until the task is dropped.
    pub async fn run(&self, retry: Duration) {
        loop {
            match self.connect().await {
                Ok(client) => {
                    client.closed().await;
                    warn!("Connection lost, reconnecting");
                }
                Err(e) => warn!(error = %e, "Connection attempt failed"),
            }
            tokio::time::sleep(retry).await;
        }
    }

    pub async fn browse(&self, env_id: &str, path: &str) -> Result<DirectoryContents, ApiError> {
        browse(&*self.client()?, &self.store, env_id, path).await
    }
}

impl Drop for SyncedClient {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

#[async_trait]
impl ThumbnailSink for SyncedClient {
    async fn request_thumbnails(&self, env_id: EnvId, paths: Vec<String>) -> Result<(), ApiError> {
        self.client()?.request_file_thumbnails(&env_id, paths).await
    }
}
