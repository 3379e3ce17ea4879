// Errors surfaced to callers of the hub.
//
// Per-connection faults (protocol errors, broken pipes, peers closing) never
// show up here: they are logged and isolated to the session that hit them.
// Only configuration problems and the bind failure at startup are returned.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The listen address could not be bound (for example, port in use).
    /// Fatal; the hub does not retry.
    #[error("failed to bind relay to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid relay configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse relay config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
