use envtag::config::ThumbnailConfig;
use envtag::environment::{EnvironmentServices, EnvironmentSummary};
use envtag::registry::EnvironmentRegistry;
use envtag::store::memory::MemoryBackend;
use envtag::transport::{Authority, Hub};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// An authority over in-memory stores with its folders in a temp dir
pub struct Harness {
    _data: TempDir,
    roots: TempDir,
    pub authority: Arc<Authority>,
}

impl Harness {
    pub fn new() -> Self {
        let data = TempDir::new().unwrap();
        let roots = TempDir::new().unwrap();
        let hub = Arc::new(Hub::new());
        let registry = EnvironmentRegistry::new(
            data.path().to_path_buf(),
            Arc::new(MemoryBackend::new()),
            EnvironmentServices::local(hub.clone(), ThumbnailConfig::default()),
        );
        Self {
            _data: data,
            roots,
            authority: Arc::new(Authority::new(Arc::new(registry), hub)),
        }
    }

    pub fn root(&self, name: &str) -> PathBuf {
        self.roots.path().join(name)
    }

    /// Create `name` with `files` (relative paths, directories created as needed) and open it.
    pub fn open_with(&self, name: &str, files: &[&str]) -> EnvironmentSummary {
        let root = self.root(name);
        write_files(&root, files);
        self.authority.registry().open(&root, true).unwrap()
    }
}

pub fn write_files(root: &Path, files: &[&str]) {
    fs::create_dir_all(root).unwrap();
    for file in files {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("contents of {}", file)).unwrap();
    }
}

/// Serve `authority` on an ephemeral loopback port until the returned sender fires or drops.
pub async fn spawn_server(
    authority: Arc<Authority>,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(envtag::transport::server::serve(listener, authority, async move {
        let _ = stopped.await;
    }));
    (addr, stop)
}
