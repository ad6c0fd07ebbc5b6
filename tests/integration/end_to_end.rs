use crate::integration::support::Harness;
use envtag::client::search::files_matching_search;
use envtag::client::{Action, ActionPayload, EnvironmentState, SyncedClient};
use envtag::config::ClientConfig;
use envtag::identity::path_hash;
use envtag::transport::LocalConnector;
use std::sync::Arc;

fn tagged_with(env: &EnvironmentState, tag_name: &str) -> Vec<String> {
    let tag_id = env
        .tags()
        .into_iter()
        .find(|t| t.name == tag_name)
        .map(|t| t.id.clone())
        .unwrap();
    let mut hashes: Vec<String> = env
        .entity_map
        .values()
        .filter(|e| e.tag_ids.contains(&tag_id))
        .map(|e| e.hash.clone())
        .collect();
    hashes.sort();
    hashes
}

#[tokio::test]
async fn tag_untag_then_resync_after_reconnect() {
    let harness = Harness::new();
    let alpha = harness.open_with(
        "alpha",
        &["a.jpg", "b.jpg", "c.jpg", "notes.txt", "sub/inner.jpg"],
    );
    let beta = harness.open_with("beta", &["x.jpg"]);

    let synced = SyncedClient::new(
        Arc::new(LocalConnector::new(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    synced.connect().await.unwrap();
    let state = synced.store().snapshot();
    assert_eq!(state.env_ids, vec![alpha.id.clone(), beta.id.clone()]);
    assert!(state.client.as_ref().unwrap().local_client);

    let listing = synced.browse(&alpha.id, "/").await.unwrap();
    assert_eq!(listing.files.len(), 5);
    assert_eq!(listing.files.iter().filter(|f| f.is_dir).count(), 1);
    let env = synced.store().env(&alpha.id).unwrap();
    assert_eq!(envtag::client::search::browsed_files(&env).unwrap().len(), 5);

    let client = synced.client().unwrap();
    let outcome = client
        .add_tags_to_files(
            &alpha.id,
            vec!["urgent".to_string()],
            vec!["/a.jpg".into(), "/b.jpg".into(), "/c.jpg".into()],
        )
        .await
        .unwrap();
    assert_eq!(outcome.succeeded(), 3);

    // The push reaches the store before the reply
    let env = synced.store().env(&alpha.id).unwrap();
    assert_eq!(tagged_with(&env, "urgent").len(), 3);
    let urgent = env.tags()[0].id.clone();
    let a_entity = env.entity_for_hash(&path_hash("/a.jpg")).unwrap().id.clone();
    assert_eq!(
        env.file_map[&path_hash("/a.jpg")].entity_id.as_deref(),
        Some(a_entity.as_str())
    );

    let outcome = client
        .remove_tags_from_files(&alpha.id, vec![urgent.clone()], vec![a_entity.clone()])
        .await
        .unwrap();
    assert_eq!(outcome.succeeded(), 1);
    let env = synced.store().env(&alpha.id).unwrap();
    assert!(env.entity_map[&a_entity].tag_ids.is_empty());

    drop(client);
    synced.disconnect().await;
    assert!(synced.client().is_err());

    synced.connect().await.unwrap();
    let env = synced.store().env(&alpha.id).unwrap();
    let mut expected = vec![path_hash("/b.jpg"), path_hash("/c.jpg")];
    expected.sort();
    assert_eq!(tagged_with(&env, "urgent"), expected);
    assert!(synced.store().env(&beta.id).unwrap().entity_map.is_empty());

    synced.store().dispatch(Action::env(
        alpha.id.as_str(),
        ActionPayload::SearchChangeTagSelection(vec![urgent]),
    ));
    let env = synced.store().env(&alpha.id).unwrap();
    assert_eq!(files_matching_search(&env).len(), 2);
}

#[tokio::test]
async fn pushes_reach_every_connected_client() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "b.jpg"]);

    let first = SyncedClient::new(
        Arc::new(LocalConnector::new(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    let second = SyncedClient::new(
        Arc::new(LocalConnector::remote(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    // The second connection was announced to the first; a round trip drains the push
    first.client().unwrap().get_connections().await.unwrap();
    let connections = first.store().snapshot().connection_map;
    assert_eq!(connections.len(), 2);
    assert!(connections.values().any(|c| !c.local_client));

    second
        .client()
        .unwrap()
        .add_tags_to_files(&alpha.id, vec!["keep".into()], vec!["/b.jpg".into()])
        .await
        .unwrap();

    // Both sessions see the push
    first.client().unwrap().get_connections().await.unwrap();
    let env = first.store().env(&alpha.id).unwrap();
    assert_eq!(tagged_with(&env, "keep"), vec![path_hash("/b.jpg")]);

    second.disconnect().await;
    first.client().unwrap().get_connections().await.unwrap();
    assert_eq!(first.store().snapshot().connection_map.len(), 1);
}

#[tokio::test]
async fn remote_clients_cannot_manage_environments() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg"]);

    let remote = SyncedClient::new(
        Arc::new(LocalConnector::remote(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    remote.connect().await.unwrap();
    let client = remote.client().unwrap();

    let err = client.close_environment(&alpha.id).await.unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::Permission);
    let err = client
        .create_environment(Some(harness.root("gamma")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::Permission);

    // Unprivileged requests still work
    assert_eq!(client.get_summaries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn closing_an_environment_updates_clients() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg"]);
    let beta = harness.open_with("beta", &["b.jpg"]);

    let synced = SyncedClient::new(
        Arc::new(LocalConnector::new(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    synced.connect().await.unwrap();
    let client = synced.client().unwrap();

    client.close_environment(&alpha.id).await.unwrap();
    assert_eq!(synced.store().snapshot().env_ids, vec![beta.id.clone()]);

    let err = client.get_all_tags(&alpha.id).await.unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::NotFound);

    let created = client
        .create_environment(Some(harness.root("gamma")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.slug, "gamma");
    assert_eq!(synced.store().snapshot().env_ids.len(), 2);
}

#[tokio::test]
async fn renaming_an_environment_reslugs_it_everywhere() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg"]);

    let synced = SyncedClient::new(
        Arc::new(LocalConnector::remote(Arc::clone(&harness.authority))),
        ClientConfig::default(),
    );
    synced.connect().await.unwrap();
    let client = synced.client().unwrap();

    let updated = client
        .update_environment(&alpha.id, Some("Holiday Pics".into()), None, Some("#00ff00".into()))
        .await
        .unwrap();
    assert_eq!(updated.slug, "holiday-pics");
    assert_eq!(updated.icon, alpha.icon);

    let summary = synced.store().env(&alpha.id).unwrap().summary;
    assert_eq!(summary, updated);
    assert!(harness.authority.registry().get_by_slug("holiday-pics").is_ok());
    assert!(harness.authority.registry().get_by_slug("alpha").is_err());

    let err = client
        .update_environment(&alpha.id, Some("  ".into()), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::Validation);
}
