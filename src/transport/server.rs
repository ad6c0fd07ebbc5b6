//! HTTP surface: the websocket endpoint and static thumbnail files.

use crate::error::ApiError;
use crate::transport::dispatch::{run_session, Authority};
use crate::transport::protocol::{ClientMessage, Outcome, ServerMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub fn router(authority: Arc<Authority>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/static/env/{slug}/thumbs", get(missing_file))
        .route("/static/env/{slug}/thumbs/", get(missing_file))
        .route("/static/env/{slug}/thumbs/{file}", get(thumbnail))
        .with_state(authority)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    authority: Arc<Authority>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening");
    }
    axum::serve(
        listener,
        router(authority).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(authority): State<Arc<Authority>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(authority, socket, addr))
}

async fn serve_socket(authority: Arc<Authority>, socket: WebSocket, addr: SocketAddr) {
    let (session, mut outbound) = authority
        .hub()
        .attach(addr.ip().is_loopback(), Some(addr.to_string()));
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let driver = tokio::spawn(run_session(
        Arc::clone(&authority),
        session.clone(),
        inbound_rx,
    ));
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if inbound_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(session = %session.id, error = %e, "Malformed client message");
                    if let Some(id) = request_id(text.as_str()) {
                        let err = ApiError::Validation(format!("Malformed message: {}", e));
                        authority.hub().send(
                            &session.id,
                            ServerMessage::Reply {
                                id,
                                outcome: Outcome::Error(err.to_payload()),
                            },
                        );
                    }
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    drop(inbound_tx);
    let _ = driver.await;
    let _ = writer.await;
    debug!(session = %session.id, "Socket closed");
}

/// Best-effort id of a message that failed to decode, so the caller still gets a reply
fn request_id(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("id")?
        .as_u64()
}

async fn missing_file() -> StatusCode {
    StatusCode::BAD_REQUEST
}

async fn thumbnail(
    State(authority): State<Arc<Authority>>,
    Path((slug, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    if file.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(StatusCode::NOT_FOUND);
    }
    let env = authority
        .registry()
        .get_by_slug(&slug)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let bytes = tokio::fs::read(env.thumbs_dir().join(&file))
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, content_type(&file))], bytes))
}

fn content_type(file: &str) -> &'static str {
    let lower = file.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".png") {
        "image/png"
    } else {
        "application/octet-stream"
    }
}
