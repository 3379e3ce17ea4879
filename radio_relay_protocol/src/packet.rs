// Binary packet codec and connection handshake.
//
// Wire format (all fields 32 bits, byte order chosen by `ByteOrder`):
//
//   handshake: u32 comm_id                       (once, right after connect)
//   packet:    f32 x, f32 y, f32 z, u32 sender,
//              { u32 len, byte[len] }*,          (one block per message)
//              u32 0                             (terminator)
//
// Decoding distinguishes three outcomes: a full packet, an orderly close
// (`Ok(None)`: the stream ended cleanly before the first header byte), and a
// `ProtocolError` (stream ended mid-field, oversized length, or I/O failure).
// A truncated packet is never mistaken for an empty one because the
// terminator must actually be read.
//
// `MAX_MESSAGE_SIZE` (16 MB) bounds the allocation a single length prefix can
// trigger. Zero-length messages cannot be encoded since zero is the
// terminator.

use std::io::{self, Read, Write};

use crate::error::ProtocolError;
use crate::types::{ByteOrder, CommId, Position};

/// Maximum allowed size of one message body (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the fixed packet header: three f32 coordinates and the sender id.
pub const HEADER_LEN: usize = 16;

/// One relay packet: the sender's position, its identity, and zero or more
/// opaque messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub position: Position,
    pub sender: CommId,
    pub messages: Vec<Vec<u8>>,
}

impl Packet {
    pub fn new(position: Position, sender: CommId, messages: Vec<Vec<u8>>) -> Self {
        Self {
            position,
            sender,
            messages,
        }
    }

    /// A message-less packet that only carries a position. Used for hub
    /// heartbeats, self-echoes, and agent position announcements.
    pub fn position_only(sender: CommId, position: Position) -> Self {
        Self::new(position, sender, Vec::new())
    }
}

/// Encoder/decoder for packets and handshakes in a fixed byte order.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketCodec {
    order: ByteOrder,
}

impl PacketCodec {
    pub const fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    /// Encode a packet into a fresh buffer.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(encoded_len(packet));
        self.encode_into(packet, &mut out)?;
        Ok(out)
    }

    /// Append the encoding of `packet` to `out`. Validates every message
    /// before writing anything, so `out` is untouched on error.
    pub fn encode_into(&self, packet: &Packet, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        for (index, msg) in packet.messages.iter().enumerate() {
            if msg.is_empty() {
                return Err(ProtocolError::EmptyMessage { index });
            }
            if msg.len() > MAX_MESSAGE_SIZE as usize {
                return Err(ProtocolError::MessageTooLarge { len: msg.len() });
            }
        }

        out.reserve(encoded_len(packet));
        out.extend_from_slice(&self.order.f32_to_bytes(packet.position.x));
        out.extend_from_slice(&self.order.f32_to_bytes(packet.position.y));
        out.extend_from_slice(&self.order.f32_to_bytes(packet.position.z));
        out.extend_from_slice(&self.order.u32_to_bytes(packet.sender.0));
        for msg in &packet.messages {
            // Bounded by MAX_MESSAGE_SIZE above.
            let len = msg.len() as u32;
            out.extend_from_slice(&self.order.u32_to_bytes(len));
            out.extend_from_slice(msg);
        }
        out.extend_from_slice(&self.order.u32_to_bytes(0));
        Ok(())
    }

    /// Encode and write one packet, then flush.
    pub fn write_packet<W: Write>(&self, writer: &mut W, packet: &Packet) -> Result<(), ProtocolError> {
        let bytes = self.encode(packet)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one packet.
    ///
    /// Returns `Ok(None)` if the stream closes cleanly before the first
    /// header byte. Any shorter-than-expected read after that is
    /// `ProtocolError::Truncated`.
    pub fn read_packet<R: Read>(&self, reader: &mut R) -> Result<Option<Packet>, ProtocolError> {
        let mut header = [0u8; HEADER_LEN];
        let filled = fill(reader, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_LEN {
            return Err(ProtocolError::Truncated { field: "header" });
        }

        let word = |i: usize| -> [u8; 4] {
            [header[i], header[i + 1], header[i + 2], header[i + 3]]
        };
        let position = Position::new(
            self.order.f32_from_bytes(word(0)),
            self.order.f32_from_bytes(word(4)),
            self.order.f32_from_bytes(word(8)),
        );
        let sender = CommId(self.order.u32_from_bytes(word(12)));

        let mut messages = Vec::new();
        loop {
            let len = self.read_u32(reader, "message length")?;
            if len == 0 {
                break;
            }
            if len > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge { len: len as usize });
            }
            let mut body = vec![0u8; len as usize];
            read_field(reader, &mut body, "message body")?;
            messages.push(body);
        }

        Ok(Some(Packet {
            position,
            sender,
            messages,
        }))
    }

    /// Write the 4-byte comm_id handshake.
    pub fn write_handshake<W: Write>(&self, writer: &mut W, id: CommId) -> io::Result<()> {
        writer.write_all(&self.order.u32_to_bytes(id.0))?;
        writer.flush()
    }

    /// Read the 4-byte comm_id handshake. `Ok(None)` if the peer closed
    /// without sending anything.
    pub fn read_handshake<R: Read>(&self, reader: &mut R) -> Result<Option<CommId>, ProtocolError> {
        let mut buf = [0u8; 4];
        match fill(reader, &mut buf)? {
            0 => Ok(None),
            4 => Ok(Some(CommId(self.order.u32_from_bytes(buf)))),
            _ => Err(ProtocolError::Truncated { field: "handshake" }),
        }
    }

    fn read_u32<R: Read>(&self, reader: &mut R, field: &'static str) -> Result<u32, ProtocolError> {
        let mut buf = [0u8; 4];
        read_field(reader, &mut buf, field)?;
        Ok(self.order.u32_from_bytes(buf))
    }
}

/// Exact size of `packet` on the wire.
pub fn encoded_len(packet: &Packet) -> usize {
    HEADER_LEN + packet.messages.iter().map(|m| 4 + m.len()).sum::<usize>() + 4
}

/// Read until `buf` is full or the stream ends. Returns the number of bytes
/// read, which is less than `buf.len()` only on EOF.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_field<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<(), ProtocolError> {
    if fill(reader, buf)? < buf.len() {
        return Err(ProtocolError::Truncated { field });
    }
    Ok(())
}
