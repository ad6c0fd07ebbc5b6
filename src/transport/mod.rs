//! Transport
//!
//! Typed request/reply and push messaging between the authority and any number of
//! clients, over websockets or an in-process link.

pub mod client;
pub mod connector;
pub mod dispatch;
pub mod hub;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use connector::{Connector, Link, LocalConnector, WsConnector};
pub use dispatch::Authority;
pub use hub::{Broadcast, Hub};
pub use protocol::{
    BatchOutcome, ClientMessage, ConnectionInfo, EventKind, HashMove, HelloResponse, Outcome, PushEvent,
    Request, Response, ServerMessage, ThumbUpdate,
};
