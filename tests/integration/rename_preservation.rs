use crate::integration::support::Harness;
use envtag::client::SyncedClient;
use envtag::config::ClientConfig;
use envtag::identity::path_hash;
use envtag::transport::LocalConnector;
use std::sync::Arc;

#[tokio::test]
async fn renamed_file_keeps_its_entity_and_tags() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "other.jpg"]);

    let synced = SyncedClient::new(
        Arc::new(LocalConnector::new(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    synced.connect().await.unwrap();
    synced.browse(&alpha.id, "/").await.unwrap();
    let client = synced.client().unwrap();
    client
        .add_tags_to_files(
            &alpha.id,
            vec!["red".into(), "blue".into()],
            vec!["/a.jpg".into()],
        )
        .await
        .unwrap();

    let before = synced.store().env(&alpha.id).unwrap();
    let entity = before.entity_for_hash(&path_hash("/a.jpg")).unwrap().clone();
    assert_eq!(entity.tag_ids.len(), 2);

    let renamed = client.rename_file(&alpha.id, "/a.jpg", "/b.jpg").await.unwrap();
    assert_eq!(renamed.hash, path_hash("/b.jpg"));
    assert_eq!(renamed.entity_id.as_deref(), Some(entity.id.as_str()));

    // Client side
    let after = synced.store().env(&alpha.id).unwrap();
    assert!(!after.file_map.contains_key(&path_hash("/a.jpg")));
    assert_eq!(
        after.file_map[&path_hash("/b.jpg")].entity_id.as_deref(),
        Some(entity.id.as_str())
    );
    assert_eq!(after.entity_map[&entity.id].tag_ids, entity.tag_ids);
    assert_eq!(after.entity_map[&entity.id].hash, path_hash("/b.jpg"));
    let root = &after.file_map[&path_hash("/")];
    let listing = root.file_hashes.as_ref().unwrap();
    assert!(listing.contains(&path_hash("/b.jpg")));
    assert!(!listing.contains(&path_hash("/a.jpg")));

    // Authority side, read fresh
    let entities = client.get_all_entities(&alpha.id).await.unwrap();
    let stored = entities.iter().find(|e| e.id == entity.id).unwrap();
    assert_eq!(stored.hash, path_hash("/b.jpg"));
    assert_eq!(stored.tag_ids, entity.tag_ids);
    assert!(harness.root("alpha").join("b.jpg").exists());
    assert!(!harness.root("alpha").join("a.jpg").exists());
}

#[tokio::test]
async fn renamed_directory_moves_nested_entities_on_every_side() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "docs/c.jpg"]);

    let synced = SyncedClient::new(
        Arc::new(LocalConnector::new(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    synced.connect().await.unwrap();
    synced.browse(&alpha.id, "/").await.unwrap();
    synced.browse(&alpha.id, "/docs").await.unwrap();
    let client = synced.client().unwrap();
    client
        .add_tags_to_files(&alpha.id, vec!["nested".into()], vec!["/docs/c.jpg".into()])
        .await
        .unwrap();
    let entity = synced
        .store()
        .env(&alpha.id)
        .unwrap()
        .entity_for_hash(&path_hash("/docs/c.jpg"))
        .unwrap()
        .clone();

    client.rename_file(&alpha.id, "/docs", "/papers").await.unwrap();

    let env = synced.store().env(&alpha.id).unwrap();
    let moved = &env.entity_map[&entity.id];
    assert_eq!(moved.hash, path_hash("/papers/c.jpg"));
    assert_eq!(moved.tag_ids, entity.tag_ids);
    assert!(!env.file_map.contains_key(&path_hash("/docs")));
    assert!(!env.file_map.contains_key(&path_hash("/docs/c.jpg")));
    let listing = env.file_map[&path_hash("/")].file_hashes.clone().unwrap();
    assert!(listing.contains(&path_hash("/papers")));

    let stored = client.get_all_entities(&alpha.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, entity.id);
    assert_eq!(stored[0].hash, moved.hash);

    // Listing the new directory attaches the moved entity to the fresh record
    synced.browse(&alpha.id, "/papers").await.unwrap();
    let env = synced.store().env(&alpha.id).unwrap();
    assert_eq!(
        env.file_map[&path_hash("/papers/c.jpg")].entity_id.as_deref(),
        Some(entity.id.as_str())
    );
}

#[tokio::test]
async fn tags_survive_rename_and_reopen() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["docs/report.jpg"]);
    let registry = Arc::clone(harness.authority.registry());

    let env = registry.get(&alpha.id).unwrap();
    env.tag_files(&["/docs/report.jpg".to_string()], &["final".to_string()])
        .unwrap();
    env.rename_file("/docs", "/archive").unwrap();
    drop(env);

    registry.close(&alpha.id).await.unwrap();
    let reopened = registry.open(&harness.root("alpha"), false).unwrap();
    assert_eq!(reopened.id, alpha.id);

    let env = registry.get(&alpha.id).unwrap();
    let entities = env.all_entities();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].hash, path_hash("/archive/report.jpg"));
    let tags = env.all_tags();
    assert_eq!(tags.len(), 1);
    assert!(entities[0].tag_ids.contains(&tags[0].id));
}

#[tokio::test]
async fn invalid_renames_are_rejected_without_changes() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "b.jpg", "dir/c.jpg"]);
    let env = harness.authority.registry().get(&alpha.id).unwrap();

    let kind = |r: Result<_, envtag::ApiError>| r.unwrap_err().kind();
    assert_eq!(
        kind(env.rename_file("/a.jpg", "/b.jpg")),
        envtag::ErrorKind::Validation
    );
    assert_eq!(
        kind(env.rename_file("/dir", "/dir/inner")),
        envtag::ErrorKind::Validation
    );
    assert_eq!(
        kind(env.rename_file("/a.jpg", "/missing/a.jpg")),
        envtag::ErrorKind::NotFound
    );
    assert!(harness.root("alpha").join("a.jpg").exists());
}
