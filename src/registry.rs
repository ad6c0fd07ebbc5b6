//! Environment Registry
//!
//! Owns every open [`Environment`] and the three indexes over them (id, slug, root path).
//! Opening reuses persisted identity when the folder has been opened before; slugs are
//! derived from the display name each time and are never persisted.

use crate::config::{OpenEnvironmentsFile, StorageConfig};
use crate::environment::{Environment, EnvironmentServices, EnvironmentSummary};
use crate::error::ApiError;
use crate::identity::new_short_id;
use crate::model::TAG_PALETTE;
use crate::store::{EnvironmentMeta, StorageBackend};
use crate::transport::protocol::PushEvent;
use crate::types::EnvId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_ICON: &str = "folder";

/// Asks the user for a folder when creation is requested without one
pub trait PathChooser: Send + Sync {
    /// `Ok(None)` when the user cancels
    fn choose(&self) -> Result<Option<PathBuf>, ApiError>;
}

/// Chooser for headless use: always cancels
#[derive(Debug, Default, Clone)]
pub struct NoPathChooser;

impl PathChooser for NoPathChooser {
    fn choose(&self) -> Result<Option<PathBuf>, ApiError> {
        Ok(None)
    }
}

/// Optional summary edits
#[derive(Debug, Clone, Default)]
pub struct SummaryEdit {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Default)]
struct Indexes {
    order: Vec<EnvId>,
    by_id: HashMap<EnvId, Arc<Environment>>,
    by_slug: HashMap<String, EnvId>,
    by_path: HashMap<PathBuf, EnvId>,
}

pub struct EnvironmentRegistry {
    indexes: RwLock<Indexes>,
    data_dir: PathBuf,
    backend: Arc<dyn StorageBackend>,
    services: EnvironmentServices,
    open_state: Option<OpenEnvironmentsFile>,
    chooser: Arc<dyn PathChooser>,
}

impl EnvironmentRegistry {
    pub fn new(
        data_dir: PathBuf,
        backend: Arc<dyn StorageBackend>,
        services: EnvironmentServices,
    ) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            data_dir,
            backend,
            services,
            open_state: None,
            chooser: Arc::new(NoPathChooser),
        }
    }

    /// Remember open roots in `file` so [`Self::init`] can restore them.
    pub fn with_open_state(mut self, file: OpenEnvironmentsFile) -> Self {
        self.open_state = Some(file);
        self
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn PathChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// Reopen every environment recorded in the open-environment state.
    ///
    /// Failures are logged per root and do not stop the others. Summaries are broadcast
    /// once at the end.
    pub fn init(&self) -> Result<usize, ApiError> {
        let roots = match &self.open_state {
            Some(state) => state.list()?,
            None => Vec::new(),
        };
        let mut opened = 0;
        for root in roots {
            match self.open_inner(&root, false, false) {
                Ok(summary) => {
                    opened += 1;
                    info!(env = %summary.id, slug = %summary.slug, path = %root.display(), "Restored environment");
                }
                Err(e) => {
                    error!(path = %root.display(), error = %e, "Failed to open environment");
                }
            }
        }
        self.broadcast_summaries();
        Ok(opened)
    }

    /// Open an environment rooted at `path`.
    pub fn open(&self, path: &Path, allow_create: bool) -> Result<EnvironmentSummary, ApiError> {
        let summary = self.open_inner(path, allow_create, true)?;
        self.broadcast_summaries();
        Ok(summary)
    }

    /// Open a new environment, asking the chooser for a folder if none is given.
    pub fn create(&self, path: Option<PathBuf>) -> Result<Option<EnvironmentSummary>, ApiError> {
        let path = match path {
            Some(path) => path,
            None => match self.chooser.choose()? {
                Some(path) => path,
                None => {
                    info!("Environment creation cancelled");
                    return Ok(None);
                }
            },
        };
        self.open(&path, true).map(Some)
    }

    fn open_inner(
        &self,
        path: &Path,
        allow_create: bool,
        remember: bool,
    ) -> Result<EnvironmentSummary, ApiError> {
        if allow_create {
            std::fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(ApiError::PathNotFound(path.display().to_string()));
        }
        let root = dunce::canonicalize(path)?;
        if self.indexes.read().by_path.contains_key(&root) {
            return Err(ApiError::AlreadyOpen(root.display().to_string()));
        }

        let env_data_dir = StorageConfig::env_data_dir(&self.data_dir, &root);
        let store = self.backend.open(&env_data_dir)?;
        let persisted = store.load_meta()?;

        let env = {
            let mut indexes = self.indexes.write();
            if indexes.by_path.contains_key(&root) {
                return Err(ApiError::AlreadyOpen(root.display().to_string()));
            }
            let meta = match persisted {
                Some(meta) => meta,
                None => {
                    let meta = EnvironmentMeta {
                        id: Self::unused_id(&indexes),
                        name: folder_name(&root),
                        icon: DEFAULT_ICON.to_string(),
                        color: TAG_PALETTE[indexes.order.len() % TAG_PALETTE.len()].to_string(),
                    };
                    store.save_meta(&meta)?;
                    meta
                }
            };
            if indexes.by_id.contains_key(&meta.id) {
                return Err(ApiError::DuplicateId(meta.id));
            }
            let slug = Self::unused_slug(&indexes, &meta.name);
            if indexes.by_slug.contains_key(&slug) {
                return Err(ApiError::DuplicateSlug(slug));
            }

            let summary = EnvironmentSummary {
                id: meta.id,
                slug,
                name: meta.name,
                icon: meta.icon,
                color: meta.color,
                path: root.clone(),
            };
            let env = Environment::new(summary, env_data_dir, store, self.services.clone())?;
            let id = env.id();
            indexes.order.push(id.clone());
            indexes.by_slug.insert(env.summary().slug, id.clone());
            indexes.by_path.insert(root.clone(), id.clone());
            indexes.by_id.insert(id, Arc::clone(&env));
            env
        };

        if remember {
            if let Some(state) = &self.open_state {
                if let Err(e) = state.add(&root) {
                    warn!(path = %root.display(), error = %e, "Failed to record open environment");
                }
            }
        }

        let summary = env.summary();
        info!(env = %summary.id, slug = %summary.slug, path = %root.display(), "Opened environment");
        Ok(summary)
    }

    /// Close an environment and forget it in the open-environment state.
    pub async fn close(&self, env_id: &str) -> Result<(), ApiError> {
        let env = {
            let mut indexes = self.indexes.write();
            let env = indexes
                .by_id
                .remove(env_id)
                .ok_or_else(|| ApiError::EnvironmentNotFound(env_id.to_string()))?;
            let summary = env.summary();
            indexes.order.retain(|id| id != env_id);
            indexes.by_slug.remove(&summary.slug);
            indexes.by_path.remove(&summary.path);
            env
        };

        if let Some(state) = &self.open_state {
            if let Err(e) = state.remove(env.root()) {
                warn!(path = %env.root().display(), error = %e, "Failed to forget closed environment");
            }
        }
        env.close().await?;
        self.broadcast_summaries();
        Ok(())
    }

    /// Close every environment without touching the open-environment state.
    pub async fn shutdown(&self) {
        let envs: Vec<Arc<Environment>> = {
            let mut indexes = self.indexes.write();
            let envs = indexes.by_id.drain().map(|(_, env)| env).collect();
            *indexes = Indexes::default();
            envs
        };
        for env in envs {
            if let Err(e) = env.close().await {
                warn!(env = %env.id(), error = %e, "Failed to close environment cleanly");
            }
        }
    }

    /// Edit display properties. A new name yields a new slug.
    pub fn update_properties(
        &self,
        env_id: &str,
        edit: SummaryEdit,
    ) -> Result<EnvironmentSummary, ApiError> {
        if let Some(name) = &edit.name {
            if name.trim().is_empty() {
                return Err(ApiError::Validation(
                    "Environment name cannot be empty".to_string(),
                ));
            }
        }

        let summary = {
            let mut indexes = self.indexes.write();
            let env = indexes
                .by_id
                .get(env_id)
                .cloned()
                .ok_or_else(|| ApiError::EnvironmentNotFound(env_id.to_string()))?;
            let current = env.summary();

            let new_slug = match &edit.name {
                Some(name) if name.trim() != current.name => {
                    indexes.by_slug.remove(&current.slug);
                    let slug = Self::unused_slug(&indexes, name.trim());
                    indexes.by_slug.insert(slug.clone(), current.id.clone());
                    Some(slug)
                }
                _ => None,
            };

            let updated = env.update_summary(|summary| {
                if let Some(name) = &edit.name {
                    summary.name = name.trim().to_string();
                }
                if let Some(icon) = edit.icon {
                    summary.icon = icon;
                }
                if let Some(color) = edit.color {
                    summary.color = color;
                }
                if let Some(slug) = new_slug.clone() {
                    summary.slug = slug;
                }
            });
            match updated {
                Ok(summary) => summary,
                Err(e) => {
                    if let Some(slug) = new_slug {
                        indexes.by_slug.remove(&slug);
                        indexes.by_slug.insert(current.slug, current.id);
                    }
                    return Err(e);
                }
            }
        };

        info!(env = %summary.id, slug = %summary.slug, "Updated environment properties");
        self.services
            .broadcast
            .broadcast(PushEvent::UpdateEnvSummary(summary.clone()));
        Ok(summary)
    }

    /// Summaries of all open environments, in opening order
    pub fn summaries(&self) -> Vec<EnvironmentSummary> {
        let indexes = self.indexes.read();
        indexes
            .order
            .iter()
            .filter_map(|id| indexes.by_id.get(id))
            .map(|env| env.summary())
            .collect()
    }

    pub fn get(&self, env_id: &str) -> Result<Arc<Environment>, ApiError> {
        self.indexes
            .read()
            .by_id
            .get(env_id)
            .cloned()
            .ok_or_else(|| ApiError::EnvironmentNotFound(env_id.to_string()))
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Arc<Environment>, ApiError> {
        let indexes = self.indexes.read();
        indexes
            .by_slug
            .get(slug)
            .and_then(|id| indexes.by_id.get(id))
            .cloned()
            .ok_or_else(|| ApiError::SlugNotFound(slug.to_string()))
    }

    /// An id no open environment uses
    pub fn new_id(&self) -> EnvId {
        Self::unused_id(&self.indexes.read())
    }

    /// A slug for `base_name` no open environment uses
    pub fn new_slug(&self, base_name: &str) -> String {
        Self::unused_slug(&self.indexes.read(), base_name)
    }

    fn broadcast_summaries(&self) {
        self.services
            .broadcast
            .broadcast(PushEvent::UpdateEnvSummaries(self.summaries()));
    }

    fn unused_id(indexes: &Indexes) -> EnvId {
        let mut id = new_short_id();
        while indexes.by_id.contains_key(&id) {
            id = new_short_id();
        }
        id
    }

    fn unused_slug(indexes: &Indexes, base_name: &str) -> String {
        let base = slugify(base_name);
        let mut slug = base.clone();
        let mut count = 1;
        while indexes.by_slug.contains_key(&slug) {
            slug = format!("{}-{}", base, count);
            count += 1;
        }
        slug
    }
}

/// Lowercase, replace anything outside `[a-z0-9-]` with `-`, collapse and trim dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().to_lowercase().chars() {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if ch == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(ch);
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "env".to_string()
    } else {
        slug.to_string()
    }
}

fn folder_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}
