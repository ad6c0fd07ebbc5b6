//! Built-in defaults every config build starts from.

use crate::config::DEFAULT_PORT;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with the defaults that must hold even when no file sets them.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", i64::from(DEFAULT_PORT))?
        .set_default("client.handshake_timeout_ms", 2000_i64)
}
