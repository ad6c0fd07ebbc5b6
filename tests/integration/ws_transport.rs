use crate::integration::support::{spawn_server, Harness};
use envtag::client::SyncedClient;
use envtag::config::ClientConfig;
use envtag::identity::path_hash;
use envtag::transport::{Client, Outcome, ServerMessage, WsConnector};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

fn ws(addr: std::net::SocketAddr) -> Arc<WsConnector> {
    Arc::new(WsConnector::for_server(&addr.ip().to_string(), addr.port()))
}

#[tokio::test]
async fn websocket_clients_share_pushes() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "b.jpg"]);
    let (addr, _stop) = spawn_server(harness.authority.clone()).await;

    let watcher = SyncedClient::new(ws(addr), ClientConfig::default());
    let actor = SyncedClient::new(ws(addr), ClientConfig::default());
    watcher.connect().await.unwrap();
    actor.connect().await.unwrap();

    // Loopback sessions are privileged
    let hello = watcher.client().unwrap().hello().clone();
    assert!(hello.local_client);
    assert_eq!(watcher.store().snapshot().env_ids, vec![alpha.id.clone()]);

    actor
        .client()
        .unwrap()
        .add_tags_to_files(&alpha.id, vec!["seen".into()], vec!["/a.jpg".into()])
        .await
        .unwrap();

    watcher.client().unwrap().get_connections().await.unwrap();
    let env = watcher.store().env(&alpha.id).unwrap();
    let entity = env.entity_for_hash(&path_hash("/a.jpg")).unwrap();
    assert_eq!(entity.tag_ids.len(), 1);
    assert_eq!(watcher.store().snapshot().connection_map.len(), 2);

    actor.disconnect().await;
    watcher.client().unwrap().get_connections().await.unwrap();
    assert_eq!(watcher.store().snapshot().connection_map.len(), 1);
}

#[tokio::test]
async fn failed_requests_carry_their_error_kind() {
    let harness = Harness::new();
    harness.open_with("alpha", &["a.jpg"]);
    let (addr, _stop) = spawn_server(harness.authority.clone()).await;

    let bus = Arc::new(envtag::client::EventBus::new());
    let client = Client::connect(ws(addr).as_ref(), bus, &ClientConfig::default())
        .await
        .unwrap();
    let err = client.get_all_tags("missing").await.unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::NotFound);
    assert!(err.to_string().contains("missing"));
    client.close().await;
    assert!(!client.is_connected());
    assert!(client.get_summaries().await.is_err());
}

#[tokio::test]
async fn malformed_messages_get_a_validation_reply() {
    let harness = Harness::new();
    let (addr, _stop) = spawn_server(harness.authority.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            r#"{"type":"request","id":7,"request":{"action":"noSuchAction"}}"#.into(),
        ))
        .await
        .unwrap();

    loop {
        let frame = socket.next().await.unwrap().unwrap();
        let Message::Text(text) = frame else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text.as_str()).unwrap() {
            ServerMessage::Reply { id, outcome } => {
                assert_eq!(id, 7);
                match outcome {
                    Outcome::Error(payload) => {
                        assert_eq!(payload.kind, envtag::ErrorKind::Validation)
                    }
                    other => panic!("expected an error, got {:?}", other),
                }
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let bus = Arc::new(envtag::client::EventBus::new());
    let err = match Client::connect(ws(addr).as_ref(), bus, &ClientConfig::default()).await {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), envtag::ErrorKind::Transport);
}
