//! Client reducer
//!
//! `reduce(state, action)` is the only way client state changes. It never fails: actions
//! that cannot apply (an environment action with no environment, or for an environment
//! that is not open) are logged and leave the state untouched.

use crate::client::action::{Action, ActionPayload};
use crate::client::state::{ClientState, EnvironmentState};
use crate::environment::FileRecord;
use crate::identity::{parent_path, path_hash};
use crate::model::Entity;
use crate::transport::protocol::HashMove;
use crate::types::FileHash;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

pub fn reduce(mut state: ClientState, action: Action) -> ClientState {
    let Action { env_id, payload } = action;
    if payload.is_global() {
        reduce_global(&mut state, payload);
        return state;
    }

    let Some(env_id) = env_id else {
        warn!(action = ?payload, "Environment action dispatched without an environment id");
        return state;
    };
    match state.env_map.get_mut(&env_id) {
        Some(env) => reduce_env(env, payload),
        None => warn!(env = %env_id, "Action for an environment that is not open"),
    }
    state
}

fn reduce_global(state: &mut ClientState, payload: ActionPayload) {
    match payload {
        ActionPayload::SetClientDetails(hello) => state.client = Some(hello),
        ActionPayload::SetConnectionList(list) => {
            state.connection_map = list.into_iter().map(|c| (c.id.clone(), c)).collect();
        }
        ActionPayload::AddConnection(info) => {
            state.connection_map.insert(info.id.clone(), info);
        }
        ActionPayload::RemoveConnection(id) => {
            state.connection_map.remove(&id);
        }
        ActionPayload::UpdateSummaries(summaries) => {
            let mut previous = std::mem::take(&mut state.env_map);
            state.env_ids = summaries.iter().map(|s| s.id.clone()).collect();
            for summary in summaries {
                let env = match previous.remove(&summary.id) {
                    Some(mut env) => {
                        env.summary = summary;
                        env
                    }
                    None => EnvironmentState::new(summary),
                };
                state.env_map.insert(env.summary.id.clone(), env);
            }
        }
        other => warn!(action = ?other, "Not a global action"),
    }
}

fn reduce_env(env: &mut EnvironmentState, payload: ActionPayload) {
    match payload {
        ActionPayload::UpdateSummary(summary) => env.summary = summary,
        ActionPayload::SetAllTags(tags) => {
            env.tag_ids = tags.iter().map(|t| t.id.clone()).collect();
            env.tag_map = tags.into_iter().map(|t| (t.id.clone(), t)).collect();
        }
        ActionPayload::AddNewTags(tags) => {
            for tag in tags {
                if !env.tag_map.contains_key(&tag.id) {
                    env.tag_ids.push(tag.id.clone());
                }
                env.tag_map.insert(tag.id.clone(), tag);
            }
        }
        ActionPayload::SetAllEntities(entities) => {
            for file in env.file_map.values_mut() {
                file.entity_id = None;
            }
            env.entity_map = HashMap::with_capacity(entities.len());
            for entity in entities {
                if let Some(file) = env.file_map.get_mut(&entity.hash) {
                    file.entity_id = Some(entity.id.clone());
                }
                env.entity_map.insert(entity.id.clone(), entity);
            }
        }
        ActionPayload::TagFiles {
            hashes,
            entity_ids,
            tag_ids,
        } => {
            if hashes.len() != entity_ids.len() {
                warn!(
                    hashes = hashes.len(),
                    entities = entity_ids.len(),
                    "Tag push with mismatched hash and entity lists, extra items ignored"
                );
            }
            for (hash, entity_id) in hashes.into_iter().zip(entity_ids) {
                let entity = env
                    .entity_map
                    .entry(entity_id.clone())
                    .or_insert_with(|| Entity {
                        id: entity_id.clone(),
                        hash: hash.clone(),
                        tag_ids: BTreeSet::new(),
                    });
                entity.hash = hash.clone();
                entity.tag_ids.extend(tag_ids.iter().cloned());
                if let Some(file) = env.file_map.get_mut(&hash) {
                    file.entity_id = Some(entity_id);
                }
            }
        }
        ActionPayload::UntagFiles {
            entity_ids,
            tag_ids,
        } => {
            for entity_id in entity_ids {
                if let Some(entity) = env.entity_map.get_mut(&entity_id) {
                    for tag_id in &tag_ids {
                        entity.tag_ids.remove(tag_id);
                    }
                }
            }
        }
        ActionPayload::RemoveMultipleFiles(hashes) => {
            for hash in hashes {
                remove_file(env, &hash);
            }
        }
        ActionPayload::RenameFile {
            old_hash,
            file,
            descendants,
        } => rename_file(env, &old_hash, file, &descendants),
        ActionPayload::SetDirectoryContent {
            directory,
            file_hashes,
        } => match env.file_map.get_mut(&directory) {
            Some(dir) => dir.file_hashes = Some(file_hashes),
            None => warn!(directory = %directory, "Listing for a directory that is not cached"),
        },
        ActionPayload::SetMultipleFileDetails(files) => {
            for file in files {
                upsert_file(env, file);
            }
        }
        ActionPayload::UpdateThumbStates(updates) => {
            for update in updates {
                if let Some(file) = env.file_map.get_mut(&update.hash) {
                    file.thumb = update.thumb;
                }
            }
        }
        ActionPayload::BrowseChangePath(path) => env.browse.path = path,
        ActionPayload::SearchChangeTagSelection(tag_ids) => env.search.selected_tag_ids = tag_ids,
        ActionPayload::SearchChangeMatchMode(mode) => env.search.match_mode = mode,
        ActionPayload::SearchChangeTagFilter(filter) => env.search.tag_filter = filter,
        other => warn!(action = ?other, "Not an environment action"),
    }
}

fn remove_file(env: &mut EnvironmentState, hash: &FileHash) {
    if let Some(record) = env.file_map.remove(hash) {
        detach_from_parent(env, &record);
        if let Some(entity_id) = &record.entity_id {
            env.entity_map.remove(entity_id);
        }
    }
    env.entity_map.retain(|_, entity| &entity.hash != hash);
}

fn rename_file(
    env: &mut EnvironmentState,
    old_hash: &FileHash,
    file: FileRecord,
    descendants: &[HashMove],
) {
    // Nested records go with their old directory; only their entities move.
    for moved in descendants {
        env.file_map.remove(&moved.old_hash);
        move_entity_hash(env, &moved.old_hash, &moved.new_hash);
    }
    if let Some(old) = env.file_map.remove(old_hash) {
        detach_from_parent(env, &old);
    }
    move_entity_hash(env, old_hash, &file.hash);
    if let Some(entity) = file
        .entity_id
        .as_ref()
        .and_then(|id| env.entity_map.get_mut(id))
    {
        entity.hash = file.hash.clone();
    }

    let parent = path_hash(&parent_path(&file.nix_path));
    let hash = file.hash.clone();
    env.file_map.insert(hash.clone(), file);
    if let Some(listing) = env
        .file_map
        .get_mut(&parent)
        .and_then(|dir| dir.file_hashes.as_mut())
    {
        if !listing.contains(&hash) {
            listing.push(hash);
        }
    }
}

fn move_entity_hash(env: &mut EnvironmentState, old_hash: &FileHash, new_hash: &FileHash) {
    for entity in env.entity_map.values_mut() {
        if &entity.hash == old_hash {
            entity.hash = new_hash.clone();
        }
    }
}

fn upsert_file(env: &mut EnvironmentState, mut file: FileRecord) {
    let previous = env.file_map.get(&file.hash);
    if file.file_hashes.is_none() {
        file.file_hashes = previous.and_then(|p| p.file_hashes.clone());
    }

    // The hash now belongs to a different entity (or none): drop the stale owner.
    let stale: Vec<String> = env
        .entity_map
        .values()
        .filter(|e| e.hash == file.hash && Some(&e.id) != file.entity_id.as_ref())
        .map(|e| e.id.clone())
        .collect();
    for id in stale {
        env.entity_map.remove(&id);
    }
    if let Some(entity) = file
        .entity_id
        .as_ref()
        .and_then(|id| env.entity_map.get_mut(id))
    {
        entity.hash = file.hash.clone();
    }

    env.file_map.insert(file.hash.clone(), file);
}

fn detach_from_parent(env: &mut EnvironmentState, record: &FileRecord) {
    if record.nix_path == "/" {
        return;
    }
    let parent = path_hash(&parent_path(&record.nix_path));
    if let Some(listing) = env
        .file_map
        .get_mut(&parent)
        .and_then(|dir| dir.file_hashes.as_mut())
    {
        listing.retain(|h| h != &record.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentSummary, ThumbnailState};
    use crate::model::Tag;
    use crate::transport::protocol::ThumbUpdate;
    use std::path::PathBuf;

    fn summary(id: &str) -> EnvironmentSummary {
        EnvironmentSummary {
            id: id.into(),
            slug: id.into(),
            name: id.into(),
            icon: "folder".into(),
            color: "#3273dc".into(),
            path: PathBuf::from(format!("/srv/{}", id)),
        }
    }

    fn file(path: &str, is_dir: bool) -> FileRecord {
        FileRecord::new(path, is_dir, ThumbnailState::Impossible)
    }

    /// One open env "e" with "/" listing "/a.jpg" and "/b.jpg"
    fn seeded() -> ClientState {
        let mut state = reduce(
            ClientState::default(),
            Action::global(ActionPayload::UpdateSummaries(vec![summary("e")])),
        );
        let root = file("/", true);
        let a = file("/a.jpg", false);
        let b = file("/b.jpg", false);
        let listing = vec![a.hash.clone(), b.hash.clone()];
        state = reduce(
            state,
            Action::env("e", ActionPayload::SetMultipleFileDetails(vec![root.clone(), a, b])),
        );
        reduce(
            state,
            Action::env(
                "e",
                ActionPayload::SetDirectoryContent {
                    directory: root.hash,
                    file_hashes: listing,
                },
            ),
        )
    }

    fn env(state: &ClientState) -> &EnvironmentState {
        &state.env_map["e"]
    }

    #[test]
    fn update_summaries_preserves_remaining_substate() {
        let state = seeded();
        let state = reduce(
            state,
            Action::global(ActionPayload::UpdateSummaries(vec![summary("e"), summary("f")])),
        );
        assert_eq!(state.env_ids, vec!["e", "f"]);
        assert_eq!(env(&state).file_map.len(), 3);
        assert_eq!(state.env_map["f"].browse.path, "/");

        let state = reduce(
            state,
            Action::global(ActionPayload::UpdateSummaries(vec![summary("f")])),
        );
        assert!(!state.env_map.contains_key("e"));
    }

    #[test]
    fn unscoped_and_unknown_env_actions_are_noops() {
        let state = seeded();
        let unscoped = reduce(
            state.clone(),
            Action::global(ActionPayload::BrowseChangePath("/x".into())),
        );
        assert_eq!(unscoped, state);
        let unknown = reduce(
            state.clone(),
            Action::env("nope", ActionPayload::BrowseChangePath("/x".into())),
        );
        assert_eq!(unknown, state);
    }

    #[test]
    fn tag_then_untag_keeps_entity() {
        let a = path_hash("/a.jpg");
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::TagFiles {
                    hashes: vec![a.clone()],
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into(), "t2".into()],
                },
            ),
        );
        assert_eq!(env(&state).file_map[&a].entity_id.as_deref(), Some("ent1"));
        assert_eq!(env(&state).entity_map["ent1"].tag_ids.len(), 2);

        let state = reduce(
            state,
            Action::env(
                "e",
                ActionPayload::UntagFiles {
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into(), "t2".into()],
                },
            ),
        );
        assert!(env(&state).entity_map["ent1"].tag_ids.is_empty());
    }

    #[test]
    fn remove_is_idempotent_and_updates_listing() {
        let a = path_hash("/a.jpg");
        let tagged = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::TagFiles {
                    hashes: vec![a.clone()],
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into()],
                },
            ),
        );
        let once = reduce(
            tagged,
            Action::env("e", ActionPayload::RemoveMultipleFiles(vec![a.clone()])),
        );
        let root = &env(&once).file_map[&path_hash("/")];
        assert_eq!(root.file_hashes.as_ref().unwrap(), &vec![path_hash("/b.jpg")]);
        assert!(env(&once).entity_map.is_empty());

        let twice = reduce(
            once.clone(),
            Action::env("e", ActionPayload::RemoveMultipleFiles(vec![a])),
        );
        assert_eq!(twice, once);
    }

    #[test]
    fn remove_uncached_file_still_drops_its_entity() {
        let ghost = path_hash("/never-listed.jpg");
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::SetAllEntities(vec![Entity {
                    id: "ent9".into(),
                    hash: ghost.clone(),
                    tag_ids: BTreeSet::new(),
                }]),
            ),
        );
        let state = reduce(state, Action::env("e", ActionPayload::RemoveMultipleFiles(vec![ghost])));
        assert!(env(&state).entity_map.is_empty());
    }

    #[test]
    fn set_directory_content_replaces() {
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::SetDirectoryContent {
                    directory: path_hash("/"),
                    file_hashes: vec!["only".into()],
                },
            ),
        );
        assert_eq!(
            env(&state).file_map[&path_hash("/")].file_hashes,
            Some(vec!["only".to_string()])
        );
    }

    #[test]
    fn file_details_keep_existing_listing() {
        let state = reduce(
            seeded(),
            Action::env("e", ActionPayload::SetMultipleFileDetails(vec![file("/", true)])),
        );
        assert_eq!(
            env(&state).file_map[&path_hash("/")]
                .file_hashes
                .as_ref()
                .map(|l| l.len()),
            Some(2)
        );
    }

    #[test]
    fn rename_moves_record_and_entity() {
        let a = path_hash("/a.jpg");
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::TagFiles {
                    hashes: vec![a.clone()],
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into()],
                },
            ),
        );
        let mut renamed = file("/c.jpg", false);
        renamed.entity_id = Some("ent1".into());
        let state = reduce(
            state,
            Action::env(
                "e",
                ActionPayload::RenameFile {
                    old_hash: a.clone(),
                    file: renamed.clone(),
                    descendants: vec![],
                },
            ),
        );

        let env = env(&state);
        assert!(!env.file_map.contains_key(&a));
        assert_eq!(env.file_map[&renamed.hash].entity_id.as_deref(), Some("ent1"));
        assert_eq!(env.entity_map["ent1"].hash, renamed.hash);
        let listing = env.file_map[&path_hash("/")].file_hashes.clone().unwrap();
        assert!(listing.contains(&renamed.hash));
        assert!(!listing.contains(&a));
    }

    #[test]
    fn directory_rename_moves_nested_entities() {
        let docs = file("/docs", true);
        let inner = file("/docs/c.jpg", false);
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::SetMultipleFileDetails(vec![docs.clone(), inner.clone()]),
            ),
        );
        let state = reduce(
            state,
            Action::env(
                "e",
                ActionPayload::TagFiles {
                    hashes: vec![inner.hash.clone()],
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into()],
                },
            ),
        );

        let papers = file("/papers", true);
        let moved_inner = path_hash("/papers/c.jpg");
        let state = reduce(
            state,
            Action::env(
                "e",
                ActionPayload::RenameFile {
                    old_hash: docs.hash.clone(),
                    file: papers.clone(),
                    descendants: vec![HashMove {
                        old_hash: inner.hash.clone(),
                        new_hash: moved_inner.clone(),
                    }],
                },
            ),
        );

        let env = env(&state);
        assert!(!env.file_map.contains_key(&docs.hash));
        assert!(!env.file_map.contains_key(&inner.hash));
        assert!(env.file_map.contains_key(&papers.hash));
        assert_eq!(env.entity_map["ent1"].hash, moved_inner);
        assert_eq!(env.entity_map["ent1"].tag_ids.len(), 1);
    }

    #[test]
    fn mismatched_tag_push_applies_matching_pairs() {
        let a = path_hash("/a.jpg");
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::TagFiles {
                    hashes: vec![a.clone(), path_hash("/b.jpg")],
                    entity_ids: vec!["ent1".into()],
                    tag_ids: vec!["t1".into()],
                },
            ),
        );
        assert_eq!(env(&state).entity_map.len(), 1);
        assert_eq!(env(&state).entity_map["ent1"].hash, a);
    }

    #[test]
    fn thumb_updates_skip_uncached_files() {
        let a = path_hash("/a.jpg");
        let state = reduce(
            seeded(),
            Action::env(
                "e",
                ActionPayload::UpdateThumbStates(vec![
                    ThumbUpdate {
                        hash: a.clone(),
                        thumb: ThumbnailState::Ready,
                    },
                    ThumbUpdate {
                        hash: "unknown".into(),
                        thumb: ThumbnailState::Ready,
                    },
                ]),
            ),
        );
        assert_eq!(env(&state).file_map[&a].thumb, ThumbnailState::Ready);
        assert_eq!(env(&state).file_map.len(), 3);
    }

    #[test]
    fn add_new_tags_preserves_order() {
        let tag = |id: &str| Tag {
            id: id.into(),
            name: id.into(),
            color: "#000".into(),
        };
        let state = reduce(
            seeded(),
            Action::env("e", ActionPayload::SetAllTags(vec![tag("x"), tag("y")])),
        );
        let state = reduce(
            state,
            Action::env("e", ActionPayload::AddNewTags(vec![tag("y"), tag("z")])),
        );
        assert_eq!(env(&state).tag_ids, vec!["x", "y", "z"]);
    }
}
