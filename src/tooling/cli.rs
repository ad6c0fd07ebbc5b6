//! CLI Tooling
//!
//! `serve` runs the authority in the foreground. `add` and `list` connect to a running
//! authority over its websocket endpoint like any other client. `hash` is offline.

use crate::client::EventBus;
use crate::config::{AppConfig, ConfigLoader, OpenEnvironmentsFile};
use crate::environment::{EnvironmentServices, EnvironmentSummary};
use crate::error::ApiError;
use crate::identity::{normalize_path, path_hash};
use crate::logging::LoggingConfig;
use crate::registry::{EnvironmentRegistry, PathChooser};
use crate::store::persistence::SledBackend;
use crate::transport::server::serve;
use crate::transport::{Authority, Broadcast, Client, Hub, WsConnector};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Envtag CLI - taggable folder collections
#[derive(Parser)]
#[command(name = "envtag")]
#[command(about = "Taggable folder collections with realtime state sync")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Shorthand for --log-level debug
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Fold the logging flags over the configured logging section.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the authority until interrupted
    Serve {
        /// Listen address (default from config)
        #[arg(long)]
        host: Option<String>,
        /// Listen port (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Open a folder as an environment on the running authority
    Add {
        /// Folder to open; prompts when omitted
        path: Option<PathBuf>,
    },
    /// List environments open on the running authority
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the file hash of an environment-relative path
    Hash {
        path: String,
    },
}

/// Asks for a folder on the terminal
#[derive(Debug, Default, Clone)]
pub struct PromptPathChooser;

impl PathChooser for PromptPathChooser {
    fn choose(&self) -> Result<Option<PathBuf>, ApiError> {
        use dialoguer::Input;

        let answer: String = Input::new()
            .with_prompt("Folder to open (empty to cancel)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| ApiError::Validation(format!("Prompt failed: {}", e)))?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(answer)))
        }
    }
}

/// CLI context: resolved configuration shared by every command
pub struct CliContext {
    config: AppConfig,
}

impl CliContext {
    /// Load configuration, with `config_path` layered over the global file.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Ok(Self { config })
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Serve { host, port } => {
                let host = host.clone().unwrap_or_else(|| self.config.server.host.clone());
                let port = port.unwrap_or(self.config.server.port);
                self.handle_serve(&host, port).await
            }
            Commands::Add { path } => self.handle_add(path.clone()).await,
            Commands::List { format } => self.handle_list(format).await,
            Commands::Hash { path } => handle_hash(path),
        }
    }

    async fn handle_serve(&self, host: &str, port: u16) -> Result<String, ApiError> {
        let storage = &self.config.storage;
        let hub = Arc::new(Hub::new());
        let broadcast: Arc<dyn Broadcast> = hub.clone();
        let services = EnvironmentServices::local(broadcast, self.config.thumbnails.clone());
        let registry = Arc::new(
            EnvironmentRegistry::new(storage.resolve_data_dir()?, Arc::new(SledBackend), services)
                .with_open_state(OpenEnvironmentsFile::new(storage.resolve_state_file()?))
                .with_chooser(Arc::new(PromptPathChooser)),
        );
        let restored = registry.init()?;
        info!(restored, "Environments restored");

        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to bind {}: {}", addr, e)))?;
        eprintln!("{} on ws://{}/ws", "Serving".green().bold(), addr);

        let authority = Arc::new(Authority::new(Arc::clone(&registry), hub));
        serve(listener, authority, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
        let open = registry.summaries().len();
        registry.shutdown().await;
        Ok(format!("Stopped; {} environment(s) closed", open))
    }

    async fn handle_add(&self, path: Option<PathBuf>) -> Result<String, ApiError> {
        let path = match path {
            Some(path) => path,
            None => match PromptPathChooser.choose()? {
                Some(path) => path,
                None => return Ok("Cancelled".to_string()),
            },
        };
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };

        let client = self.connect().await?;
        let created = client.create_environment(Some(path)).await;
        client.close().await;
        match created? {
            Some(summary) => Ok(format!(
                "Opened {} as {} ({})",
                summary.path.display(),
                summary.name.bold(),
                summary.slug.cyan()
            )),
            None => Ok("Cancelled".to_string()),
        }
    }

    async fn handle_list(&self, format: &str) -> Result<String, ApiError> {
        let client = self.connect().await?;
        let summaries = client.get_summaries().await;
        client.close().await;
        let summaries = summaries?;
        match format {
            "json" => serde_json::to_string_pretty(&summaries)
                .map_err(|e| ApiError::Validation(format!("Failed to encode summaries: {}", e))),
            "text" => Ok(format_summaries(&summaries)),
            other => Err(ApiError::Validation(format!(
                "Invalid format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }

    async fn connect(&self) -> Result<Client, ApiError> {
        let connector = WsConnector::for_server(&self.config.server.host, self.config.server.port);
        Client::connect(&connector, Arc::new(EventBus::new()), &self.config.client).await
    }
}

fn handle_hash(path: &str) -> Result<String, ApiError> {
    let normalized = normalize_path(path)?;
    Ok(format!("{}  {}", path_hash(&normalized), normalized))
}

fn format_summaries(summaries: &[EnvironmentSummary]) -> String {
    if summaries.is_empty() {
        return format!("{}", "No environments open".dimmed());
    }
    use comfy_table::Table;
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Slug", "Name", "Path"]);
    for summary in summaries {
        table.add_row(vec![
            summary.id.clone(),
            summary.slug.clone(),
            summary.name.clone(),
            summary.path.display().to_string(),
        ]);
    }
    table.to_string()
}
