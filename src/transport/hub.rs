//! Session hub: tracks connected clients and fans pushes out to them.
//!
//! Each session owns an unbounded outbound channel. Sending never waits on the receiving
//! side, so a slow client cannot hold up a broadcast; sessions whose receiver is gone are
//! pruned on the next send.

use crate::identity::new_short_id;
use crate::transport::protocol::{ConnectionInfo, PushEvent, ServerMessage};
use crate::types::SessionId;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Delivers a push to every connected session
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, event: PushEvent);
}

struct SessionHandle {
    info: ConnectionInfo,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Default)]
pub struct Hub {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and announce it to the others.
    pub fn attach(
        &self,
        local_client: bool,
        address: Option<String>,
    ) -> (ConnectionInfo, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = {
            let mut sessions = self.sessions.write();
            let mut id = new_short_id();
            while sessions.contains_key(&id) {
                id = new_short_id();
            }
            let info = ConnectionInfo {
                id: id.clone(),
                local_client,
                address,
                connected_at: Utc::now().to_rfc3339(),
            };
            sessions.insert(
                id,
                SessionHandle {
                    info: info.clone(),
                    tx,
                },
            );
            info
        };

        info!(session = %info.id, local = info.local_client, address = ?info.address, "Session attached");
        self.broadcast_except(&info.id, PushEvent::AddConnection(info.clone()));
        (info, rx)
    }

    /// Forget a session and announce its departure. Unknown ids are ignored.
    pub fn detach(&self, session_id: &str) {
        if self.sessions.write().remove(session_id).is_some() {
            info!(session = %session_id, "Session detached");
            self.broadcast(PushEvent::RemoveConnection(session_id.to_string()));
        }
    }

    /// Send to one session. Returns false if the session is gone.
    pub fn send(&self, session_id: &str, message: ServerMessage) -> bool {
        let delivered = match self.sessions.read().get(session_id) {
            Some(handle) => handle.tx.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            self.detach(session_id);
        }
        delivered
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self
            .sessions
            .read()
            .values()
            .map(|handle| handle.info.clone())
            .collect();
        all.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn session(&self, session_id: &str) -> Option<ConnectionInfo> {
        self.sessions
            .read()
            .get(session_id)
            .map(|handle| handle.info.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn broadcast_except(&self, skip: &str, event: PushEvent) {
        let mut closed = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, handle) in sessions.iter() {
                if id == skip {
                    continue;
                }
                let message = ServerMessage::Push {
                    event: event.clone(),
                };
                if handle.tx.send(message).is_err() {
                    closed.push(id.clone());
                }
            }
        }
        debug!(kind = ?event.kind(), pruned = closed.len(), "Broadcast push");
        for id in closed {
            self.detach(&id);
        }
    }
}

impl Broadcast for Hub {
    fn broadcast(&self, event: PushEvent) {
        self.broadcast_except("", event);
    }
}
