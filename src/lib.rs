//! Envtag: taggable folder collections with realtime state sync
//!
//! An authority process owns a set of environments (folders on disk with a tag store
//! each). Clients connect over a typed request/push transport, bootstrap a normalized
//! mirror of that state and keep it current by applying the same deltas the authority
//! broadcasts to every session.

pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod registry;
pub mod store;
pub mod tooling;
pub mod transport;
pub mod types;

pub use error::{ApiError, ErrorKind};
pub use registry::EnvironmentRegistry;
