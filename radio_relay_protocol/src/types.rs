// Core value types shared by the relay hub and the agents.
//
// `CommId` is the agent identity carried in the handshake and in every
// packet's sender field. `Position` is the world-frame location of an agent
// (three f32 components, the same precision the wire carries). `ByteOrder`
// selects how 32-bit fields are laid out on the wire; both ends of a
// connection must agree on it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Agent identity on the relay. Positive and unique among the sessions of one
/// hub for the lifetime of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommId(pub u32);

impl CommId {
    /// Zero is never a valid agent identity.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// World-aligned position of an agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(self, other: Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        dx.hypot(dy).hypot(dz)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Byte order of the 32-bit wire fields. `Native` follows the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    pub fn u32_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Native => value.to_ne_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_from_bytes(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Native => u32::from_ne_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn f32_to_bytes(self, value: f32) -> [u8; 4] {
        self.u32_to_bytes(value.to_bits())
    }

    pub fn f32_from_bytes(self, bytes: [u8; 4]) -> f32 {
        f32::from_bits(self.u32_from_bytes(bytes))
    }
}
