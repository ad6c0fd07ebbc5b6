//! Connectors open a message link to an authority.

use crate::error::ApiError;
use crate::transport::dispatch::{run_session, Authority};
use crate::transport::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Both halves of an open connection. Dropping `outbound` closes it.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, ApiError>;
}

/// In-process connection straight into an [`Authority`]
pub struct LocalConnector {
    authority: Arc<Authority>,
    local_client: bool,
}

impl LocalConnector {
    /// Privileged, like a client on the authority's machine
    pub fn new(authority: Arc<Authority>) -> Self {
        Self {
            authority,
            local_client: true,
        }
    }

    /// Unprivileged, like a client on another machine
    pub fn remote(authority: Arc<Authority>) -> Self {
        Self {
            authority,
            local_client: false,
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<Link, ApiError> {
        let (session, inbound) = self.authority.hub().attach(self.local_client, None);
        let (outbound, requests) = mpsc::unbounded_channel();
        tokio::spawn(run_session(Arc::clone(&self.authority), session, requests));
        Ok(Link { outbound, inbound })
    }
}

/// Websocket connection to a running authority
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn for_server(host: &str, port: u16) -> Self {
        Self::new(format!("ws://{}:{}/ws", host, port))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, ApiError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to connect to {}: {}", self.url, e)))?;
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut requests) = mpsc::unbounded_channel::<ClientMessage>();
        let (replies, inbound) = mpsc::unbounded_channel::<ServerMessage>();

        tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode client message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(message) => {
                                if replies.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Malformed server message"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!(%url, "Websocket closed");
        });

        Ok(Link { outbound, inbound })
    }
}
