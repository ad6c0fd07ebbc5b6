//! Selectors over an environment's client state.

use crate::client::state::{EnvironmentState, MatchMode};
use crate::environment::FileRecord;
use crate::identity::path_hash;
use crate::model::{Entity, Tag};
use crate::types::EntityId;

/// Entities whose tags satisfy the current selection, sorted by id.
///
/// An empty selection matches nothing.
pub fn files_matching_search(env: &EnvironmentState) -> Vec<EntityId> {
    let selected = &env.search.selected_tag_ids;
    if selected.is_empty() {
        return Vec::new();
    }
    let matches = |entity: &Entity| match env.search.match_mode {
        MatchMode::All => selected.iter().all(|id| entity.tag_ids.contains(id)),
        MatchMode::Any => selected.iter().any(|id| entity.tag_ids.contains(id)),
    };
    let mut ids: Vec<EntityId> = env
        .entity_map
        .values()
        .filter(|entity| matches(*entity))
        .map(|entity| entity.id.clone())
        .collect();
    ids.sort();
    ids
}

/// Tags whose names contain the filter text, ignoring case, in authority order.
pub fn tags_matching_filter(env: &EnvironmentState) -> Vec<Tag> {
    let needle = env.search.tag_filter.trim().to_lowercase();
    env.tags()
        .into_iter()
        .filter(|tag| needle.is_empty() || tag.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Cached children of the directory being browsed; `None` until it has been listed.
pub fn browsed_files(env: &EnvironmentState) -> Option<Vec<&FileRecord>> {
    let dir = env.file_map.get(&path_hash(&env.browse.path))?;
    let listing = dir.file_hashes.as_ref()?;
    Some(
        listing
            .iter()
            .filter_map(|hash| env.file_map.get(hash))
            .collect(),
    )
}
