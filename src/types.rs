//! Core identifier types shared by the authority and its clients.

/// EnvId: random short id of an open environment
pub type EnvId = String;

/// FileHash: fixed-width hash of a normalized relative path (see [`crate::identity`])
pub type FileHash = String;

/// EntityId: durable, server-generated tagging identity
pub type EntityId = String;

/// TagId: server-generated tag identifier
pub type TagId = String;

/// SessionId: id assigned to one connected client
pub type SessionId = String;
