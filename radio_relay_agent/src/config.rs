// Agent connection settings.
//
// Loaded from JSON (every field optional) or built in code. `patience_ms`
// controls how long a neighbor stays visible to the interpreter after it was
// last heard from. `max_pending_packets` is the inbox ceiling: an agent that
// stops stepping while packets keep arriving is disconnected rather than
// buffering without bound. `send_timeout_ms` bounds each write to the hub; a
// hub that stops reading ends the connection instead of stalling a step.

use std::path::Path;
use std::time::Duration;

use radio_relay_protocol::{ByteOrder, Position};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub byte_order: ByteOrder,
    pub patience_ms: u64,
    pub max_pending_packets: usize,
    pub recv_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Announced to the hub right after the handshake, so the hub knows
    /// where this agent is before the first step. Leave unset when positions
    /// come from an external feed.
    pub initial_position: Option<Position>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8000,
            byte_order: ByteOrder::Native,
            patience_ms: 1000,
            max_pending_packets: 4096,
            recv_timeout_ms: 100,
            send_timeout_ms: 1000,
            initial_position: None,
        }
    }
}

impl AgentConfig {
    /// Config pointing at a relay address, everything else default.
    pub fn for_relay(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        let config: AgentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.host.is_empty() {
            return Err(AgentError::InvalidConfig("host must not be empty".into()));
        }
        if self.patience_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "patience_ms must be positive".into(),
            ));
        }
        if self.max_pending_packets == 0 {
            return Err(AgentError::InvalidConfig(
                "max_pending_packets must be at least 1".into(),
            ));
        }
        if self.recv_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn patience(&self) -> Duration {
        Duration::from_millis(self.patience_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
