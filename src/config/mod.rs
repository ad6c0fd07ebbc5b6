//! Configuration
//!
//! Layered configuration loaded through the `config` crate. Precedence, lowest first:
//! built-in defaults, the global file (`$XDG_CONFIG_HOME/envtag/config.toml`), an explicit
//! file passed on the command line, then `ENVTAG__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;
pub mod state;
pub mod storage;

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use state::OpenEnvironmentsFile;
pub use storage::StorageConfig;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 10548;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Client-side timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum wait for the handshake reply after connecting
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Optional timeout for steady-state requests; unset means wait indefinitely
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Quiescence window before queued thumbnail requests are flushed
    #[serde(default = "default_thumbnail_debounce_ms")]
    pub thumbnail_debounce_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

fn default_thumbnail_debounce_ms() -> u64 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: None,
            thumbnail_debounce_ms: default_thumbnail_debounce_ms(),
        }
    }
}

/// Thumbnail pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Worker tasks per environment
    #[serde(default = "default_thumbnail_workers")]
    pub workers: usize,

    /// Maximum queued jobs per environment
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Extensions the default renderer accepts
    #[serde(default = "default_thumbnail_extensions")]
    pub extensions: Vec<String>,
}

fn default_thumbnail_workers() -> usize {
    2
}

fn default_max_queue_size() -> usize {
    10000
}

fn default_thumbnail_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string()]
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            workers: default_thumbnail_workers(),
            max_queue_size: default_max_queue_size(),
            extensions: default_thumbnail_extensions(),
        }
    }
}
