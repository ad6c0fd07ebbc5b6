//! Thumbnail request batcher
//!
//! Views ask for thumbnails one file at a time as files scroll into view. The batcher
//! buffers those asks per environment and sends one `requestFileThumbnails` per
//! environment once that environment has been quiet for the debounce window.

use crate::error::ApiError;
use crate::types::EnvId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Receives flushed batches
#[async_trait]
pub trait ThumbnailSink: Send + Sync {
    async fn request_thumbnails(&self, env_id: EnvId, paths: Vec<String>) -> Result<(), ApiError>;
}

enum Command {
    Enqueue(EnvId, String),
    Cancel(EnvId, String),
}

type Guard = Arc<Mutex<HashSet<(EnvId, String)>>>;

struct PendingBatch {
    paths: Vec<String>,
    deadline: Instant,
}

pub struct ThumbnailBatcher {
    commands: mpsc::UnboundedSender<Command>,
    requested: Guard,
    worker: JoinHandle<()>,
}

impl ThumbnailBatcher {
    /// Start the batching task. Must be called inside a tokio runtime.
    pub fn new(sink: Arc<dyn ThumbnailSink>, debounce: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let requested: Guard = Arc::new(Mutex::new(HashSet::new()));
        let worker = tokio::spawn(Self::run(rx, sink, debounce, Arc::clone(&requested)));
        Self {
            commands,
            requested,
            worker,
        }
    }

    /// Queue a path. Returns false if it was already requested this session.
    pub fn enqueue(&self, env_id: &str, path: &str) -> bool {
        let key = (env_id.to_string(), path.to_string());
        if !self.requested.lock().insert(key) {
            return false;
        }
        self.commands
            .send(Command::Enqueue(env_id.to_string(), path.to_string()))
            .is_ok()
    }

    /// Drop a path that has not been flushed yet and allow it to be requested again.
    pub fn cancel(&self, env_id: &str, path: &str) {
        self.requested
            .lock()
            .remove(&(env_id.to_string(), path.to_string()));
        let _ = self
            .commands
            .send(Command::Cancel(env_id.to_string(), path.to_string()));
    }

    /// Forget every already-requested path, e.g. after a reconnect.
    pub fn reset(&self) {
        self.requested.lock().clear();
    }

    pub fn was_requested(&self, env_id: &str, path: &str) -> bool {
        self.requested
            .lock()
            .contains(&(env_id.to_string(), path.to_string()))
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<Command>,
        sink: Arc<dyn ThumbnailSink>,
        debounce: Duration,
        requested: Guard,
    ) {
        let mut pending: HashMap<EnvId, PendingBatch> = HashMap::new();
        loop {
            let next_deadline = pending.values().map(|b| b.deadline).min();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Enqueue(env_id, path)) => {
                        let batch = pending.entry(env_id).or_insert_with(|| PendingBatch {
                            paths: Vec::new(),
                            deadline: Instant::now() + debounce,
                        });
                        if !batch.paths.contains(&path) {
                            batch.paths.push(path);
                        }
                        batch.deadline = Instant::now() + debounce;
                    }
                    Some(Command::Cancel(env_id, path)) => {
                        if let Some(batch) = pending.get_mut(&env_id) {
                            batch.paths.retain(|p| p != &path);
                            if batch.paths.is_empty() {
                                pending.remove(&env_id);
                            }
                        }
                    }
                    None => {
                        let due: Vec<EnvId> = pending.keys().cloned().collect();
                        Self::flush(&mut pending, due, &sink, &requested).await;
                        break;
                    }
                },
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                    let now = Instant::now();
                    let due: Vec<EnvId> = pending
                        .iter()
                        .filter(|(_, b)| b.deadline <= now)
                        .map(|(env_id, _)| env_id.clone())
                        .collect();
                    Self::flush(&mut pending, due, &sink, &requested).await;
                }
            }
        }
    }

    async fn flush(
        pending: &mut HashMap<EnvId, PendingBatch>,
        due: Vec<EnvId>,
        sink: &Arc<dyn ThumbnailSink>,
        requested: &Guard,
    ) {
        for env_id in due {
            let Some(batch) = pending.remove(&env_id) else {
                continue;
            };
            debug!(env = %env_id, count = batch.paths.len(), "Flushing thumbnail requests");
            if let Err(e) = sink
                .request_thumbnails(env_id.clone(), batch.paths.clone())
                .await
            {
                warn!(env = %env_id, error = %e, "Thumbnail request failed");
                let mut guard = requested.lock();
                for path in batch.paths {
                    guard.remove(&(env_id.clone(), path));
                }
            }
        }
    }
}

impl Drop for ThumbnailBatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
