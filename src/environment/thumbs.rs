//! Thumbnail Pipeline
//!
//! Background queue that turns thumbnail requests into rendered preview files. Requests are
//! fire-and-forget: callers enqueue and return, workers render through a
//! [`ThumbnailRenderer`] and report each finished job through a completion callback.

use crate::config::ThumbnailConfig;
use crate::environment::file_record::ThumbnailState;
use crate::error::ApiError;
use crate::types::FileHash;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Produces a preview image for a source file
pub trait ThumbnailRenderer: Send + Sync {
    /// Whether files with this extension (no dot, any case) can be rendered
    fn supports(&self, ext: &str) -> bool;
    fn render(&self, source: &Path, dest: &Path) -> Result<(), ApiError>;
}

/// Uses the source file itself as its preview. Only suitable for formats a browser can
/// display directly, so the default extension list is JPEG only.
#[derive(Debug, Clone)]
pub struct PassthroughRenderer {
    extensions: Vec<String>,
}

impl PassthroughRenderer {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }
}

impl ThumbnailRenderer for PassthroughRenderer {
    fn supports(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    fn render(&self, source: &Path, dest: &Path) -> Result<(), ApiError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest)?;
        Ok(())
    }
}

/// One queued render
#[derive(Debug, Clone)]
pub struct ThumbJob {
    pub hash: FileHash,
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Finished render, reported to the owning environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbResult {
    pub hash: FileHash,
    pub state: ThumbnailState,
}

pub type CompletionFn = Arc<dyn Fn(ThumbResult) + Send + Sync>;

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub pending: usize,
    pub processing: usize,
    pub rendered: usize,
    pub failed: usize,
}

pub struct ThumbnailPipeline {
    queue: Arc<Mutex<VecDeque<ThumbJob>>>,
    /// Hashes queued or in flight, so repeated requests are not rendered twice
    in_flight: Arc<Mutex<HashSet<FileHash>>>,
    notify: Arc<Notify>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    config: ThumbnailConfig,
    renderer: Arc<dyn ThumbnailRenderer>,
    on_complete: CompletionFn,
    stats: Arc<RwLock<PipelineStats>>,
}

impl ThumbnailPipeline {
    pub fn new(
        config: ThumbnailConfig,
        renderer: Arc<dyn ThumbnailRenderer>,
        on_complete: CompletionFn,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            notify: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            config,
            renderer,
            on_complete,
            stats: Arc::new(RwLock::new(PipelineStats::default())),
        }
    }

    pub fn renderer(&self) -> &Arc<dyn ThumbnailRenderer> {
        &self.renderer
    }

    /// Queue jobs. Returns how many were accepted; duplicates of queued or in-flight
    /// hashes are skipped, and jobs past the queue limit are dropped with a warning.
    pub fn enqueue(&self, jobs: Vec<ThumbJob>) -> usize {
        self.ensure_started();

        let mut accepted = 0;
        {
            let mut queue = self.queue.lock();
            let mut in_flight = self.in_flight.lock();
            for job in jobs {
                if in_flight.contains(&job.hash) {
                    continue;
                }
                if queue.len() >= self.config.max_queue_size {
                    warn!(
                        queue_size = queue.len(),
                        max_size = self.config.max_queue_size,
                        "Thumbnail queue is full, dropping request"
                    );
                    break;
                }
                in_flight.insert(job.hash.clone());
                queue.push_back(job);
                accepted += 1;
            }
        }

        if accepted > 0 {
            self.stats.write().pending += accepted;
            for _ in 0..accepted.min(self.config.workers) {
                self.notify.notify_one();
            }
            debug!(accepted, "Enqueued thumbnail jobs");
        }
        accepted
    }

    fn ensure_started(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.workers.max(1) {
            let queue = Arc::clone(&self.queue);
            let in_flight = Arc::clone(&self.in_flight);
            let notify = Arc::clone(&self.notify);
            let running = Arc::clone(&self.running);
            let renderer = Arc::clone(&self.renderer);
            let on_complete = Arc::clone(&self.on_complete);
            let stats = Arc::clone(&self.stats);

            workers.push(tokio::spawn(async move {
                Self::worker_loop(
                    worker_id,
                    queue,
                    in_flight,
                    notify,
                    running,
                    renderer,
                    on_complete,
                    stats,
                )
                .await;
            }));
        }
        info!(worker_count = workers.len(), "Started thumbnail workers");
    }

    /// Stop workers after their current job.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
        info!("Stopped thumbnail workers");
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Wait until nothing is queued or rendering.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), ApiError> {
        let start = Instant::now();
        loop {
            let idle = self.queue.lock().is_empty() && self.in_flight.lock().is_empty();
            if idle {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ApiError::Timeout(
                    "thumbnail pipeline did not drain".to_string(),
                ));
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_loop(
        worker_id: usize,
        queue: Arc<Mutex<VecDeque<ThumbJob>>>,
        in_flight: Arc<Mutex<HashSet<FileHash>>>,
        notify: Arc<Notify>,
        running: Arc<AtomicBool>,
        renderer: Arc<dyn ThumbnailRenderer>,
        on_complete: CompletionFn,
        stats: Arc<RwLock<PipelineStats>>,
    ) {
        debug!(worker_id, "Thumbnail worker started");

        while running.load(Ordering::SeqCst) {
            let job = queue.lock().pop_front();
            let Some(job) = job else {
                tokio::select! {
                    _ = notify.notified() => continue,
                    _ = sleep(Duration::from_millis(100)) => continue,
                }
            };

            {
                let mut stats = stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.processing += 1;
            }

            let render_renderer = Arc::clone(&renderer);
            let source = job.source.clone();
            let dest = job.dest.clone();
            let outcome = tokio::task::spawn_blocking(move || render_renderer.render(&source, &dest))
                .await
                .unwrap_or_else(|e| {
                    Err(ApiError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("render task failed: {}", e),
                    )))
                });

            let state = match outcome {
                Ok(()) => ThumbnailState::Ready,
                Err(e) => {
                    warn!(worker_id, hash = %job.hash, error = %e, "Thumbnail render failed");
                    ThumbnailState::Impossible
                }
            };
            {
                let mut stats = stats.write();
                stats.processing = stats.processing.saturating_sub(1);
                if state == ThumbnailState::Ready {
                    stats.rendered += 1;
                } else {
                    stats.failed += 1;
                }
            }

            on_complete(ThumbResult {
                hash: job.hash.clone(),
                state,
            });
            in_flight.lock().remove(&job.hash);
        }

        debug!(worker_id, "Thumbnail worker stopped");
    }
}
