// Errors surfaced to callers of the agent API.
//
// Faults detected on the receive thread (protocol errors, the hub closing the
// connection, inbox overflow) are not returned from any call. They end the
// transport, which callers observe through `is_alive()` and, for sends, as
// `AgentError::Stopped`.

use std::io;

use radio_relay_protocol::{CommId, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to relay at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send handshake for comm_id {comm_id}: {source}")]
    Handshake {
        comm_id: CommId,
        #[source]
        source: ProtocolError,
    },

    #[error("failed to send packet: {0}")]
    Send(#[source] ProtocolError),

    /// The transport or the step worker has already shut down.
    #[error("agent is no longer running")]
    Stopped,

    #[error("comm_id {0} is already in use")]
    DuplicateCommId(CommId),

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse agent config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
