// Relay hub configuration.
//
// `RelayConfig` is loaded from JSON (every field optional, defaults below) or
// built in code, then checked with `validate()` before the hub binds. The
// `relay` binary layers command-line overrides on top of a loaded file.
//
// `tick_hz` selects who drives the forwarding ticks:
// - `None`: the embedding caller calls `RelayHub::tick()` itself.
// - `Some(0.0)`: an internal ticker thread ticks back-to-back.
// - `Some(hz)`: an internal ticker thread ticks at a fixed period of 1/hz.

use std::path::Path;
use std::time::Duration;

use radio_relay_protocol::ByteOrder;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Number of agents the hub waits for before it starts forwarding.
    pub expected_clients: usize,
    /// Packets travel between two agents only if they are strictly closer
    /// than this.
    pub neighbor_range: f32,
    pub tick_hz: Option<f64>,
    pub byte_order: ByteOrder,
    /// Socket read timeout for session receive threads. Only bounds how
    /// long a thread takes to notice shutdown.
    pub recv_timeout_ms: u64,
    /// A send that blocks longer than this fails and drops the receiver.
    pub send_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8000,
            expected_clients: 1,
            neighbor_range: 1.7,
            tick_hz: None,
            byte_order: ByteOrder::Native,
            recv_timeout_ms: 100,
            send_timeout_ms: 1000,
            handshake_timeout_ms: 5000,
        }
    }
}

impl RelayConfig {
    /// Parse a config from JSON text and validate it.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.host.is_empty() {
            return Err(RelayError::InvalidConfig("host must not be empty".into()));
        }
        if self.expected_clients == 0 {
            return Err(RelayError::InvalidConfig(
                "expected_clients must be at least 1".into(),
            ));
        }
        if !self.neighbor_range.is_finite() || self.neighbor_range < 0.0 {
            return Err(RelayError::InvalidConfig(format!(
                "neighbor_range must be finite and non-negative, got {}",
                self.neighbor_range
            )));
        }
        if let Some(hz) = self.tick_hz.filter(|hz| !hz.is_finite() || *hz < 0.0) {
            return Err(RelayError::InvalidConfig(format!(
                "tick_hz must be finite and non-negative, got {hz}"
            )));
        }
        if self.recv_timeout_ms == 0 || self.send_timeout_ms == 0 || self.handshake_timeout_ms == 0
        {
            return Err(RelayError::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Period of the internal ticker, if one should run. `Duration::ZERO`
    /// means tick as fast as possible.
    pub fn tick_period(&self) -> Option<Duration> {
        self.tick_hz.map(|hz| {
            if hz > 0.0 {
                Duration::from_secs_f64(1.0 / hz)
            } else {
                Duration::ZERO
            }
        })
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
