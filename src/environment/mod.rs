//! Environment
//!
//! One open folder on the authority. An environment owns the ephemeral FileRecord cache for
//! the paths clients have looked at, the durable tag/entity model, and a thumbnail pipeline.
//! Every mutation is persisted first, applied in memory second, and broadcast last.

pub mod file_record;
pub mod fs;
pub mod thumbs;

pub use file_record::{DirectoryContents, FileRecord, ThumbnailState};
pub use fs::{DesktopShell, EntryInfo, Filesystem, LocalFilesystem, SystemShell};
pub use thumbs::{PassthroughRenderer, ThumbJob, ThumbResult, ThumbnailPipeline, ThumbnailRenderer};

use crate::config::ThumbnailConfig;
use crate::error::ApiError;
use crate::identity::{join, normalize_path, parent_path, path_hash};
use crate::model::{Entity, Tag, TagEntityModel};
use crate::store::{EnvironmentMeta, EnvironmentStore};
use crate::transport::hub::Broadcast;
use crate::transport::protocol::{BatchOutcome, HashMove, PushEvent, ThumbUpdate};
use crate::types::{EntityId, EnvId, FileHash, TagId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Public description of an open environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub id: EnvId,
    pub slug: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    /// Canonical root folder
    pub path: PathBuf,
}

impl EnvironmentSummary {
    pub fn meta(&self) -> EnvironmentMeta {
        EnvironmentMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            color: self.color.clone(),
        }
    }
}

/// Collaborators shared by every environment
#[derive(Clone)]
pub struct EnvironmentServices {
    pub fs: Arc<dyn Filesystem>,
    pub shell: Arc<dyn DesktopShell>,
    pub renderer: Arc<dyn ThumbnailRenderer>,
    pub broadcast: Arc<dyn Broadcast>,
    pub thumbnails: ThumbnailConfig,
}

impl EnvironmentServices {
    /// Local disk, system opener and passthrough thumbnails
    pub fn local(broadcast: Arc<dyn Broadcast>, thumbnails: ThumbnailConfig) -> Self {
        Self {
            fs: Arc::new(LocalFilesystem),
            shell: Arc::new(SystemShell),
            renderer: Arc::new(PassthroughRenderer::new(&thumbnails.extensions)),
            broadcast,
            thumbnails,
        }
    }
}

#[derive(Default)]
struct EnvState {
    files: HashMap<FileHash, FileRecord>,
    model: TagEntityModel,
}

/// A path resolved against the root and confirmed to exist
struct Located {
    nix_path: String,
    hash: FileHash,
    abs: PathBuf,
    is_dir: bool,
}

pub struct Environment {
    summary: RwLock<EnvironmentSummary>,
    root: PathBuf,
    data_dir: PathBuf,
    store: Arc<dyn EnvironmentStore>,
    services: EnvironmentServices,
    state: Mutex<EnvState>,
    thumbs: ThumbnailPipeline,
}

impl Environment {
    /// Build an environment over `root`, loading its tags and entities from `store`.
    pub fn new(
        summary: EnvironmentSummary,
        data_dir: PathBuf,
        store: Arc<dyn EnvironmentStore>,
        services: EnvironmentServices,
    ) -> Result<Arc<Self>, ApiError> {
        let model = TagEntityModel::from_parts(store.load_tags()?, store.load_entities()?);
        let root = summary.path.clone();

        Ok(Arc::new_cyclic(|weak: &Weak<Environment>| {
            let weak = weak.clone();
            let thumbs = ThumbnailPipeline::new(
                services.thumbnails.clone(),
                Arc::clone(&services.renderer),
                Arc::new(move |result: ThumbResult| {
                    if let Some(env) = weak.upgrade() {
                        env.apply_thumb_result(result);
                    }
                }),
            );
            Environment {
                summary: RwLock::new(summary),
                root,
                data_dir,
                store,
                services,
                state: Mutex::new(EnvState {
                    files: HashMap::new(),
                    model,
                }),
                thumbs,
            }
        }))
    }

    pub fn id(&self) -> EnvId {
        self.summary.read().id.clone()
    }

    pub fn summary(&self) -> EnvironmentSummary {
        self.summary.read().clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.data_dir.join("thumbs")
    }

    pub fn thumb_path(&self, hash: &str) -> PathBuf {
        self.thumbs_dir().join(format!("{}.jpg", hash))
    }

    /// Apply a summary edit and persist the resulting metadata.
    pub fn update_summary(
        &self,
        edit: impl FnOnce(&mut EnvironmentSummary),
    ) -> Result<EnvironmentSummary, ApiError> {
        let mut next = self.summary();
        edit(&mut next);
        self.store.save_meta(&next.meta())?;
        *self.summary.write() = next.clone();
        Ok(next)
    }

    pub fn all_tags(&self) -> Vec<Tag> {
        self.state.lock().model.tags()
    }

    pub fn all_entities(&self) -> Vec<Entity> {
        self.state.lock().model.entities()
    }

    /// Cached record for a hash, if any client has listed it
    pub fn file(&self, hash: &str) -> Option<FileRecord> {
        self.state.lock().files.get(hash).cloned()
    }

    /// List the immediate children of a directory.
    pub fn get_directory_contents(&self, path: &str) -> Result<DirectoryContents, ApiError> {
        let dir = self.locate(path)?;
        if !dir.is_dir {
            return Err(ApiError::Validation(format!(
                "Not a directory: {}",
                dir.nix_path
            )));
        }
        let entries = self.services.fs.list_dir(&dir.abs)?;

        let mut state = self.state.lock();
        let files: Vec<FileRecord> = entries
            .iter()
            .map(|entry| self.upsert_record(&mut state, &join(&dir.nix_path, &entry.name), entry.is_dir))
            .collect();
        let hashes: Vec<FileHash> = files.iter().map(|f| f.hash.clone()).collect();

        self.upsert_record(&mut state, &dir.nix_path, true);
        let directory = match state.files.get_mut(&dir.hash) {
            Some(record) => {
                record.file_hashes = Some(hashes);
                record.clone()
            }
            None => return Err(ApiError::PathNotFound(dir.nix_path)),
        };

        debug!(env = %self.id(), path = %directory.nix_path, count = files.len(), "Listed directory");
        Ok(DirectoryContents { directory, files })
    }

    /// Add tags to files, creating tags whose names are new.
    pub fn tag_files(&self, paths: &[String], tag_names: &[String]) -> Result<BatchOutcome, ApiError> {
        if tag_names.is_empty() {
            return Err(ApiError::Validation("No tag names given".to_string()));
        }

        let mut outcome = BatchOutcome::default();
        let mut hashes = Vec::new();
        let mut entity_ids = Vec::new();
        let (created, tag_ids, failure) = {
            let mut state = self.state.lock();
            let resolved = state.model.resolve_tags(tag_names)?;
            let mut created = Vec::with_capacity(resolved.created.len());
            let mut failure = None;
            for tag in resolved.created {
                if let Err(e) = self.store.put_tag(&tag) {
                    failure = Some(e);
                    break;
                }
                created.push(tag);
            }
            state.model.commit_tags(created.iter().cloned());

            if failure.is_none() {
                for path in paths {
                    match self.tag_one(&mut state, path, &resolved.ids) {
                        Ok((hash, entity_id)) => {
                            outcome.ok(path.as_str());
                            hashes.push(hash);
                            entity_ids.push(entity_id);
                        }
                        Err(e) => {
                            debug!(path = %path, error = %e, "Tagging failed");
                            outcome.failed(path.as_str(), &e);
                        }
                    }
                }
            }
            (created, resolved.ids, failure)
        };

        let env_id = self.id();
        if !created.is_empty() {
            self.services.broadcast.broadcast(PushEvent::EnvAddTags {
                env_id: env_id.clone(),
                tags: created,
            });
        }
        if let Some(e) = failure {
            warn!(env = %env_id, error = %e, "Failed to persist new tag");
            return Err(e.into());
        }
        if !hashes.is_empty() {
            info!(env = %env_id, files = hashes.len(), tags = tag_ids.len(), "Tagged files");
            self.services.broadcast.broadcast(PushEvent::EnvTagFiles {
                env_id,
                hashes,
                entity_ids,
                tag_ids,
            });
        }
        Ok(outcome)
    }

    fn tag_one(
        &self,
        state: &mut EnvState,
        path: &str,
        tag_ids: &[TagId],
    ) -> Result<(FileHash, EntityId), ApiError> {
        let target = self.locate(path)?;
        let mut entity = state.model.draft_for_hash(&target.hash);
        entity.tag_ids.extend(tag_ids.iter().cloned());
        self.store.put_entity(&entity)?;

        let entity_id = entity.id.clone();
        state.model.commit(entity);
        if let Some(record) = state.files.get_mut(&target.hash) {
            record.entity_id = Some(entity_id.clone());
        }
        Ok((target.hash, entity_id))
    }

    /// Remove tags from entities. Entities stay registered even with no tags left.
    pub fn untag_files(&self, entity_ids: &[EntityId], tag_ids: &[TagId]) -> Result<BatchOutcome, ApiError> {
        let mut outcome = BatchOutcome::default();
        let mut changed = Vec::new();
        {
            let mut state = self.state.lock();
            for entity_id in entity_ids {
                let result = match state.model.entity(entity_id) {
                    None => Err(ApiError::EntityNotFound(entity_id.clone())),
                    Some(existing) => {
                        let mut entity = existing.clone();
                        for tag_id in tag_ids {
                            entity.tag_ids.remove(tag_id);
                        }
                        self.store
                            .put_entity(&entity)
                            .map(|_| entity)
                            .map_err(ApiError::from)
                    }
                };
                match result {
                    Ok(entity) => {
                        state.model.commit(entity);
                        outcome.ok(entity_id.as_str());
                        changed.push(entity_id.clone());
                    }
                    Err(e) => outcome.failed(entity_id.as_str(), &e),
                }
            }
        }

        if !changed.is_empty() {
            self.services.broadcast.broadcast(PushEvent::EnvUntagFiles {
                env_id: self.id(),
                entity_ids: changed,
                tag_ids: tag_ids.to_vec(),
            });
        }
        Ok(outcome)
    }

    /// Delete files (directories recursively) and everything attached to them.
    pub fn remove_files(&self, paths: &[String]) -> Result<BatchOutcome, ApiError> {
        let mut outcome = BatchOutcome::default();
        let mut removed = Vec::new();
        for path in paths {
            match self.remove_one(path) {
                Ok(hashes) => {
                    outcome.ok(path.as_str());
                    removed.extend(hashes);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to remove file");
                    outcome.failed(path.as_str(), &e);
                }
            }
        }

        if !removed.is_empty() {
            info!(env = %self.id(), count = removed.len(), "Removed files");
            self.services.broadcast.broadcast(PushEvent::EnvRemoveFiles {
                env_id: self.id(),
                hashes: removed,
            });
        }
        Ok(outcome)
    }

    fn remove_one(&self, path: &str) -> Result<Vec<FileHash>, ApiError> {
        let target = self.locate(path)?;
        if target.nix_path == "/" {
            return Err(ApiError::Validation(
                "Cannot remove the environment root".to_string(),
            ));
        }

        let mut hashes = vec![target.hash.clone()];
        if target.is_dir {
            for relative in self.services.fs.descendants(&target.abs)? {
                if let Some(nix) = nested_path(&target.nix_path, &relative) {
                    hashes.push(path_hash(&nix));
                }
            }
        }
        self.services.fs.remove(&target.abs)?;

        let mut state = self.state.lock();
        for hash in &hashes {
            state.files.remove(hash);
            if let Some(entity) = state.model.remove_for_hash(hash) {
                if let Err(e) = self.store.delete_entity(&entity.id) {
                    warn!(entity = %entity.id, error = %e, "Failed to delete entity");
                }
            }
            let thumb = self.thumb_path(hash);
            if thumb.exists() {
                if let Err(e) = std::fs::remove_file(&thumb) {
                    warn!(thumb = %thumb.display(), error = %e, "Failed to delete thumbnail");
                }
            }
        }
        let parent_hash = path_hash(&parent_path(&target.nix_path));
        if let Some(listing) = state
            .files
            .get_mut(&parent_hash)
            .and_then(|p| p.file_hashes.as_mut())
        {
            listing.retain(|h| h != &target.hash);
        }
        Ok(hashes)
    }

    /// Rename or move a file inside the environment, keeping its entity.
    pub fn rename_file(&self, old_path: &str, new_path: &str) -> Result<FileRecord, ApiError> {
        if old_path.trim().is_empty() || new_path.trim().is_empty() {
            return Err(ApiError::Validation("Rename paths cannot be empty".to_string()));
        }
        let from = self.locate(old_path)?;
        let to_nix = normalize_path(new_path)?;
        if from.nix_path == "/" || to_nix == "/" {
            return Err(ApiError::Validation(
                "Cannot rename the environment root".to_string(),
            ));
        }
        if to_nix == from.nix_path {
            return Err(ApiError::Validation(format!(
                "Source and destination are the same: {}",
                to_nix
            )));
        }
        if to_nix.starts_with(&format!("{}/", from.nix_path)) {
            return Err(ApiError::Validation(format!(
                "Cannot move {} into itself",
                from.nix_path
            )));
        }

        let to_abs = self.absolute(&to_nix);
        if self.services.fs.stat(&to_abs).is_some() {
            return Err(ApiError::Validation(format!(
                "Destination already exists: {}",
                to_nix
            )));
        }
        let to_parent = parent_path(&to_nix);
        if self.services.fs.stat(&self.absolute(&to_parent)) != Some(true) {
            return Err(ApiError::PathNotFound(to_parent));
        }

        // Nested paths are collected before the move, while they still resolve.
        let to_hash = path_hash(&to_nix);
        let mut descendants = Vec::new();
        if from.is_dir {
            for relative in self.services.fs.descendants(&from.abs)? {
                if let (Some(old), Some(new)) = (
                    nested_path(&from.nix_path, &relative),
                    nested_path(&to_nix, &relative),
                ) {
                    descendants.push(HashMove {
                        old_hash: path_hash(&old),
                        new_hash: path_hash(&new),
                    });
                }
            }
        }
        let mut moves = vec![HashMove {
            old_hash: from.hash.clone(),
            new_hash: to_hash.clone(),
        }];
        moves.extend(descendants.iter().cloned());

        let record = {
            let mut state = self.state.lock();
            let mut moved = Vec::new();
            let mut stale = Vec::new();
            for m in &moves {
                if let Some(entity) = state.model.entity_for_hash(&m.old_hash) {
                    let mut entity = entity.clone();
                    entity.hash = m.new_hash.clone();
                    moved.push(entity);
                }
                // Left behind by a file that no longer exists at the destination
                if let Some(entity) = state.model.entity_for_hash(&m.new_hash) {
                    stale.push(entity.id.clone());
                }
            }

            for id in &stale {
                self.store.delete_entity(id)?;
                state.model.remove_entity(id);
            }
            for (written, entity) in moved.iter().enumerate() {
                if let Err(e) = self.store.put_entity(entity) {
                    self.restore_entities(&state.model, &moved[..written]);
                    return Err(e.into());
                }
            }
            if let Err(e) = self.services.fs.rename(&from.abs, &to_abs) {
                self.restore_entities(&state.model, &moved);
                return Err(e);
            }

            for m in &moves {
                state.files.remove(&m.old_hash);
                let old_thumb = self.thumb_path(&m.old_hash);
                if old_thumb.exists() {
                    if let Err(e) = std::fs::rename(&old_thumb, self.thumb_path(&m.new_hash)) {
                        warn!(thumb = %old_thumb.display(), error = %e, "Failed to move thumbnail");
                    }
                }
            }
            for entity in moved {
                state.model.commit(entity);
            }

            let from_parent = path_hash(&parent_path(&from.nix_path));
            if let Some(listing) = state
                .files
                .get_mut(&from_parent)
                .and_then(|p| p.file_hashes.as_mut())
            {
                listing.retain(|h| h != &from.hash);
            }

            let record = self.upsert_record(&mut state, &to_nix, from.is_dir);
            if let Some(listing) = state
                .files
                .get_mut(&path_hash(&to_parent))
                .and_then(|p| p.file_hashes.as_mut())
            {
                if !listing.contains(&to_hash) {
                    listing.push(to_hash.clone());
                }
            }
            record
        };

        info!(env = %self.id(), from = %from.nix_path, to = %to_nix, nested = descendants.len(), "Renamed file");
        self.services.broadcast.broadcast(PushEvent::EnvRenameFile {
            env_id: self.id(),
            old_hash: from.hash,
            file: record.clone(),
            descendants,
        });
        Ok(record)
    }

    /// Write back the stored form of entities whose re-keyed copies were already persisted.
    fn restore_entities(&self, model: &TagEntityModel, rekeyed: &[Entity]) {
        for entity in rekeyed {
            if let Some(original) = model.entity(&entity.id) {
                if let Err(e) = self.store.put_entity(original) {
                    warn!(entity = %entity.id, error = %e, "Failed to restore entity after aborted rename");
                }
            }
        }
    }

    /// Queue thumbnail renders for files still in the Possible state.
    ///
    /// Files already Ready or Impossible are reported back immediately so the requester
    /// does not wait on a render that will never come.
    pub fn request_thumbnails(&self, paths: &[String]) {
        let mut jobs = Vec::new();
        let mut settled = Vec::new();
        {
            let mut state = self.state.lock();
            for path in paths {
                let target = match self.locate(path) {
                    Ok(target) => target,
                    Err(e) => {
                        debug!(path = %path, error = %e, "Skipping thumbnail request");
                        continue;
                    }
                };
                if target.is_dir {
                    continue;
                }
                let record = self.upsert_record(&mut state, &target.nix_path, false);
                match record.thumb {
                    ThumbnailState::Possible => jobs.push(ThumbJob {
                        dest: self.thumb_path(&target.hash),
                        hash: target.hash,
                        source: target.abs,
                    }),
                    thumb => settled.push(ThumbUpdate {
                        hash: record.hash,
                        thumb,
                    }),
                }
            }
        }

        if !settled.is_empty() {
            self.services.broadcast.broadcast(PushEvent::EnvThumbUpdates {
                env_id: self.id(),
                updates: settled,
            });
        }
        if !jobs.is_empty() {
            self.thumbs.enqueue(jobs);
        }
    }

    fn apply_thumb_result(&self, result: ThumbResult) {
        if let Some(record) = self.state.lock().files.get_mut(&result.hash) {
            record.thumb = result.state;
        }
        self.services.broadcast.broadcast(PushEvent::EnvThumbUpdates {
            env_id: self.id(),
            updates: vec![ThumbUpdate {
                hash: result.hash,
                thumb: result.state,
            }],
        });
    }

    pub fn open_file(&self, path: &str) -> Result<(), ApiError> {
        let target = self.locate(path)?;
        self.services.shell.open(&target.abs)
    }

    pub fn open_in_explorer(&self, path: &str) -> Result<(), ApiError> {
        let target = self.locate(path)?;
        self.services.shell.reveal(&target.abs)
    }

    pub fn thumbnail_pipeline(&self) -> &ThumbnailPipeline {
        &self.thumbs
    }

    /// Stop background work and flush the store.
    pub async fn close(&self) -> Result<(), ApiError> {
        self.thumbs.stop().await;
        self.store.flush()?;
        info!(env = %self.id(), "Closed environment");
        Ok(())
    }

    fn absolute(&self, nix_path: &str) -> PathBuf {
        let relative = nix_path.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn locate(&self, path: &str) -> Result<Located, ApiError> {
        let nix_path =
            normalize_path(path).map_err(|_| ApiError::PathNotFound(path.to_string()))?;
        let abs = self.absolute(&nix_path);
        let is_dir = self
            .services
            .fs
            .stat(&abs)
            .ok_or_else(|| ApiError::PathNotFound(nix_path.clone()))?;
        Ok(Located {
            hash: path_hash(&nix_path),
            nix_path,
            abs,
            is_dir,
        })
    }

    fn initial_thumb(&self, nix_path: &str, is_dir: bool) -> ThumbnailState {
        if is_dir {
            return ThumbnailState::Impossible;
        }
        let ext = FileRecord::new(nix_path, false, ThumbnailState::Impossible).ext;
        if !self.services.renderer.supports(&ext) {
            ThumbnailState::Impossible
        } else if self.thumb_path(&path_hash(nix_path)).exists() {
            ThumbnailState::Ready
        } else {
            ThumbnailState::Possible
        }
    }

    /// Create or refresh the cached record for a path and return a copy.
    fn upsert_record(&self, state: &mut EnvState, nix_path: &str, is_dir: bool) -> FileRecord {
        let hash = path_hash(nix_path);
        let entity_id = state.model.entity_for_hash(&hash).map(|e| e.id.clone());
        match state.files.get_mut(&hash) {
            Some(record) => {
                if record.is_dir != is_dir {
                    *record = FileRecord::new(nix_path, is_dir, self.initial_thumb(nix_path, is_dir));
                }
                record.entity_id = entity_id;
                record.clone()
            }
            None => {
                let mut record = FileRecord::new(nix_path, is_dir, self.initial_thumb(nix_path, is_dir));
                record.entity_id = entity_id;
                state.files.insert(hash, record.clone());
                record
            }
        }
    }
}

/// Join a descendant's path (relative to a directory) onto that directory's normalized path.
fn nested_path(base: &str, relative: &Path) -> Option<String> {
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return None;
    }
    normalize_path(&join(base, &segments.join("/"))).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::store::memory::MemoryEnvironmentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    pub(crate) struct RecordingBroadcast {
        pub events: Mutex<Vec<PushEvent>>,
    }

    impl Broadcast for RecordingBroadcast {
        fn broadcast(&self, event: PushEvent) {
            self.events.lock().push(event);
        }
    }

    #[derive(Default)]
    struct RecordingShell {
        opened: Mutex<Vec<PathBuf>>,
    }

    impl DesktopShell for RecordingShell {
        fn open(&self, path: &Path) -> Result<(), ApiError> {
            self.opened.lock().push(path.to_path_buf());
            Ok(())
        }

        fn reveal(&self, path: &Path) -> Result<(), ApiError> {
            self.opened.lock().push(path.to_path_buf());
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        _data: TempDir,
        env: Arc<Environment>,
        events: Arc<RecordingBroadcast>,
        shell: Arc<RecordingShell>,
    }

    /// Memory store whose writes can be made to fail a set number of times
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryEnvironmentStore,
        failing_tag_puts: AtomicUsize,
        failing_entity_puts: AtomicUsize,
    }

    fn trip(counter: &AtomicUsize) -> Result<(), StorageError> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            ))),
            Err(_) => Ok(()),
        }
    }

    impl EnvironmentStore for FlakyStore {
        fn load_meta(&self) -> Result<Option<EnvironmentMeta>, StorageError> {
            self.inner.load_meta()
        }
        fn save_meta(&self, meta: &EnvironmentMeta) -> Result<(), StorageError> {
            self.inner.save_meta(meta)
        }
        fn load_tags(&self) -> Result<Vec<Tag>, StorageError> {
            self.inner.load_tags()
        }
        fn put_tag(&self, tag: &Tag) -> Result<(), StorageError> {
            trip(&self.failing_tag_puts)?;
            self.inner.put_tag(tag)
        }
        fn load_entities(&self) -> Result<Vec<Entity>, StorageError> {
            self.inner.load_entities()
        }
        fn put_entity(&self, entity: &Entity) -> Result<(), StorageError> {
            trip(&self.failing_entity_puts)?;
            self.inner.put_entity(entity)
        }
        fn delete_entity(&self, entity_id: &str) -> Result<(), StorageError> {
            self.inner.delete_entity(entity_id)
        }
        fn flush(&self) -> Result<(), StorageError> {
            self.inner.flush()
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryEnvironmentStore::new()))
    }

    fn fixture_with(store: Arc<dyn EnvironmentStore>) -> Fixture {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(root.path().join("b.txt"), b"b").unwrap();
        std::fs::create_dir(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs").join("c.jpg"), b"c").unwrap();

        let events = Arc::new(RecordingBroadcast::default());
        let shell = Arc::new(RecordingShell::default());
        let thumbnails = ThumbnailConfig::default();
        let mut services = EnvironmentServices::local(events.clone(), thumbnails);
        services.shell = shell.clone() as Arc<dyn DesktopShell>;

        let summary = EnvironmentSummary {
            id: "env1".into(),
            slug: "root".into(),
            name: "root".into(),
            icon: String::new(),
            color: String::new(),
            path: root.path().to_path_buf(),
        };
        let env = Environment::new(
            summary,
            data.path().to_path_buf(),
            store,
            services,
        )
        .unwrap();
        Fixture {
            _root: root,
            _data: data,
            env,
            events,
            shell,
        }
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lists_immediate_children_with_thumb_states() {
        let fx = fixture();
        let contents = fx.env.get_directory_contents("/").unwrap();
        let names: Vec<&str> = contents.files.iter().map(|f| f.base.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.txt", "docs"]);
        assert_eq!(contents.directory.nix_path, "/");
        assert_eq!(
            contents.directory.file_hashes.as_ref().map(|h| h.len()),
            Some(3)
        );
        assert_eq!(contents.files[0].thumb, ThumbnailState::Possible);
        assert_eq!(contents.files[1].thumb, ThumbnailState::Impossible);
        assert!(contents.files[2].is_dir);
    }

    #[test]
    fn missing_and_escaping_paths_are_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.env.get_directory_contents("/nope"),
            Err(ApiError::PathNotFound(_))
        ));
        assert!(matches!(
            fx.env.get_directory_contents("/../.."),
            Err(ApiError::PathNotFound(_))
        ));
    }

    #[test]
    fn tagging_reports_per_item_and_broadcasts() {
        let fx = fixture();
        let outcome = fx
            .env
            .tag_files(&strings(&["/a.jpg", "/missing.jpg", "/docs/c.jpg"]), &strings(&["urgent"]))
            .unwrap();
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.errors().count(), 1);

        let events = fx.events.events.lock();
        assert!(matches!(&events[0], PushEvent::EnvAddTags { tags, .. } if tags.len() == 1));
        match &events[1] {
            PushEvent::EnvTagFiles { hashes, entity_ids, .. } => {
                assert_eq!(hashes.len(), 2);
                assert_eq!(entity_ids.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(fx.env.all_entities().len(), 2);
    }

    #[test]
    fn new_tags_reach_memory_only_once_stored() {
        let store = Arc::new(FlakyStore::default());
        store.failing_tag_puts.store(1, Ordering::SeqCst);
        let fx = fixture_with(store.clone());

        let err = fx
            .env
            .tag_files(&strings(&["/a.jpg"]), &strings(&["urgent"]))
            .unwrap_err();
        assert!(matches!(err, ApiError::StorageError(_)), "{:?}", err);
        assert!(fx.env.all_tags().is_empty());
        assert!(fx.env.all_entities().is_empty());
        assert!(fx.events.events.lock().is_empty());

        fx.env
            .tag_files(&strings(&["/a.jpg"]), &strings(&["urgent"]))
            .unwrap();
        let stored = store.load_tags().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(fx.env.all_tags(), stored);
        let entity = fx.env.all_entities().remove(0);
        assert!(entity.tag_ids.contains(&stored[0].id));

        let events = fx.events.events.lock();
        assert!(matches!(&events[0], PushEvent::EnvAddTags { tags, .. } if tags == &stored));
    }

    #[test]
    fn untag_keeps_entity_and_rejects_unknown() {
        let fx = fixture();
        fx.env
            .tag_files(&strings(&["/a.jpg"]), &strings(&["x"]))
            .unwrap();
        let entity = fx.env.all_entities().remove(0);
        let tag_ids: Vec<TagId> = entity.tag_ids.iter().cloned().collect();

        let outcome = fx
            .env
            .untag_files(&[entity.id.clone(), "ghost".to_string()], &tag_ids)
            .unwrap();
        assert_eq!(outcome.succeeded(), 1);
        let after = fx.env.all_entities();
        assert_eq!(after.len(), 1);
        assert!(after[0].tag_ids.is_empty());
    }

    #[test]
    fn remove_directory_drops_nested_entities() {
        let fx = fixture();
        fx.env
            .tag_files(&strings(&["/docs/c.jpg"]), &strings(&["x"]))
            .unwrap();
        fx.env.get_directory_contents("/").unwrap();

        let outcome = fx.env.remove_files(&strings(&["/docs"])).unwrap();
        assert_eq!(outcome.succeeded(), 1);
        assert!(fx.env.all_entities().is_empty());

        let root = fx.env.file(&path_hash("/")).unwrap();
        assert_eq!(root.file_hashes.unwrap().len(), 2);

        // Second removal of the same path fails on its own
        let again = fx.env.remove_files(&strings(&["/docs"])).unwrap();
        assert_eq!(again.succeeded(), 0);
    }

    #[test]
    fn rename_rekeys_entity() {
        let fx = fixture();
        fx.env
            .tag_files(&strings(&["/a.jpg"]), &strings(&["keep"]))
            .unwrap();
        let before = fx.env.all_entities().remove(0);

        let record = fx.env.rename_file("/a.jpg", "/docs/renamed.jpg").unwrap();
        assert_eq!(record.hash, path_hash("/docs/renamed.jpg"));
        assert_eq!(record.entity_id.as_deref(), Some(before.id.as_str()));

        let after = fx.env.all_entities().remove(0);
        assert_eq!(after.id, before.id);
        assert_eq!(after.tag_ids, before.tag_ids);
        assert_eq!(after.hash, record.hash);
        assert!(fx.env.file(&path_hash("/a.jpg")).is_none());
    }

    #[test]
    fn rename_directory_moves_nested_entities() {
        let fx = fixture();
        fx.env
            .tag_files(&strings(&["/docs/c.jpg"]), &strings(&["keep"]))
            .unwrap();
        fx.env.rename_file("/docs", "/papers").unwrap();
        let entity = fx.env.all_entities().remove(0);
        assert_eq!(entity.hash, path_hash("/papers/c.jpg"));

        let events = fx.events.events.lock();
        match events.last() {
            Some(PushEvent::EnvRenameFile {
                old_hash,
                descendants,
                ..
            }) => {
                assert_eq!(old_hash, &path_hash("/docs"));
                assert_eq!(
                    descendants,
                    &vec![HashMove {
                        old_hash: path_hash("/docs/c.jpg"),
                        new_hash: path_hash("/papers/c.jpg"),
                    }]
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn failed_entity_write_aborts_rename() {
        let store = Arc::new(FlakyStore::default());
        let fx = fixture_with(store.clone());
        fx.env
            .tag_files(&strings(&["/a.jpg"]), &strings(&["keep"]))
            .unwrap();
        let before = fx.env.all_entities().remove(0);

        store.failing_entity_puts.store(1, Ordering::SeqCst);
        let err = fx.env.rename_file("/a.jpg", "/moved.jpg").unwrap_err();
        assert!(matches!(err, ApiError::StorageError(_)), "{:?}", err);

        assert!(fx._root.path().join("a.jpg").exists());
        assert!(!fx._root.path().join("moved.jpg").exists());
        assert_eq!(fx.env.all_entities(), vec![before.clone()]);
        assert_eq!(store.load_entities().unwrap(), vec![before]);
    }

    #[test]
    fn rename_replaces_stale_destination_entity() {
        let fx = fixture();
        fx.env
            .tag_files(&strings(&["/a.jpg", "/b.txt"]), &strings(&["keep"]))
            .unwrap();
        let a_entity = fx.env.all_entities().into_iter().find(|e| e.hash == path_hash("/a.jpg")).unwrap();
        // The tagged file disappears behind the environment's back
        std::fs::remove_file(fx._root.path().join("b.txt")).unwrap();

        fx.env.rename_file("/a.jpg", "/b.txt").unwrap();
        let entities = fx.env.all_entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, a_entity.id);
        assert_eq!(entities[0].hash, path_hash("/b.txt"));
    }

    #[test]
    fn rename_validation() {
        let fx = fixture();
        for (from, to) in [("/a.jpg", "/a.jpg"), ("/", "/x"), ("/a.jpg", "/b.txt"), ("/docs", "/docs/inner")] {
            assert!(
                matches!(fx.env.rename_file(from, to), Err(ApiError::Validation(_))),
                "{} -> {}",
                from,
                to
            );
        }
        assert!(matches!(
            fx.env.rename_file("/a.jpg", "/nowhere/a.jpg"),
            Err(ApiError::PathNotFound(_))
        ));
    }

    #[test]
    fn open_file_goes_through_shell() {
        let fx = fixture();
        fx.env.open_file("/a.jpg").unwrap();
        fx.env.open_in_explorer("/docs").unwrap();
        assert_eq!(fx.shell.opened.lock().len(), 2);
        assert!(fx.env.open_file("/gone").is_err());
    }

    #[tokio::test]
    async fn thumbnails_become_ready_and_are_pushed() {
        let fx = fixture();
        fx.env.get_directory_contents("/").unwrap();
        fx.env
            .request_thumbnails(&strings(&["/a.jpg", "/b.txt", "/missing.jpg"]));
        fx.env
            .thumbnail_pipeline()
            .wait_idle(Duration::from_secs(5))
            .await
            .unwrap();

        let hash = path_hash("/a.jpg");
        assert_eq!(fx.env.file(&hash).unwrap().thumb, ThumbnailState::Ready);
        assert!(fx.env.thumb_path(&hash).exists());

        let events = fx.events.events.lock();
        let updates: Vec<&ThumbUpdate> = events
            .iter()
            .filter_map(|e| match e {
                PushEvent::EnvThumbUpdates { updates, .. } => Some(updates),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(updates
            .iter()
            .any(|u| u.hash == hash && u.thumb == ThumbnailState::Ready));
        assert!(updates
            .iter()
            .any(|u| u.hash == path_hash("/b.txt") && u.thumb == ThumbnailState::Impossible));
        drop(events);
        fx.env.close().await.unwrap();
    }
}
