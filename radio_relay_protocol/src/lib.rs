// radio_relay_protocol: wire protocol for the swarm radio relay.
//
// This crate defines the packet format, handshake, and shared value types used
// by the relay hub (`radio_relay_hub`) and the agents (`radio_relay_agent`) to
// talk over TCP. It is shared between both sides and knows nothing about
// sessions, ticks, or interpreters.
//
// Module overview:
// - `types.rs`:  `CommId`, `Position`, `ByteOrder`.
// - `packet.rs`: `Packet` and `PacketCodec`: binary encode/decode of packets
//                and the 4-byte comm_id handshake.
// - `error.rs`:  `ProtocolError` (truncation, oversize, I/O).
// - `io.rs`:     `RetryOnTimeout`, a `Read` adapter that retries socket
//                receive timeouts while the owner is still alive.
//
// Design decisions:
// - **Binary, not serde.** The wire layout is fixed by the agents that speak
//   it: 32-bit fields, a length prefix per message, zero terminator.
// - **Messages as opaque `Vec<u8>`.** The relay never inspects payloads.
// - **No async runtime.** Works over any `Read`/`Write`, so blocking TCP
//   streams and in-memory cursors share one code path.

pub mod error;
pub mod io;
pub mod packet;
pub mod types;

pub use error::ProtocolError;
pub use io::RetryOnTimeout;
pub use packet::{HEADER_LEN, MAX_MESSAGE_SIZE, Packet, PacketCodec, encoded_len};
pub use types::{ByteOrder, CommId, Position};
