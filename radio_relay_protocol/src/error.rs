// Error type for packet and handshake decoding/encoding.
//
// A clean EOF at a packet boundary is not an error: the codec reports it as
// `Ok(None)` so callers can treat it as an orderly peer shutdown. Everything
// here is a fault on that one connection only.

use std::io;

use thiserror::Error;

use crate::packet::MAX_MESSAGE_SIZE;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended in the middle of a fixed-size field or message body.
    #[error("stream truncated while reading {field}")]
    Truncated { field: &'static str },

    /// A length prefix (or an outbound message) exceeds `MAX_MESSAGE_SIZE`.
    #[error("message too large: {len} bytes (max {max})", max = MAX_MESSAGE_SIZE)]
    MessageTooLarge { len: usize },

    /// Zero-length messages collide with the list terminator.
    #[error("message {index} is empty; zero length is reserved for the terminator")]
    EmptyMessage { index: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True if this is a receive/send timeout rather than a real fault.
    pub fn is_timeout(&self) -> bool {
        match self {
            ProtocolError::Io(e) => is_timeout(e),
            _ => false,
        }
    }
}

/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
