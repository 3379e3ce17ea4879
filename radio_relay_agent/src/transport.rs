// Agent side of the relay connection.
//
// `AgentTransport::connect()` opens the TCP connection, sends the 4-byte
// comm_id handshake (and, if configured, a position announcement), then
// spawns a receive thread. The receive thread sorts what the hub sends:
//
// - A packet whose sender is this agent is the hub's authoritative position
//   echo. It overwrites the cached self position and wakes anyone waiting
//   for one.
// - Anything else goes into the inbox, which the step pipeline empties once
//   per step. If more than `max_pending_packets` pile up between two drains
//   the agent is not keeping up, and the connection is closed.
//
// When the receive loop ends for any reason the transport is marked dead and
// the self position is cleared, so a step blocked waiting for a position
// wakes up and sees the agent is gone.
//
// Sends come from the step worker and from `announce_position()` callers, so
// the write half sits behind its own lock to keep packets from interleaving.
// Writes are bounded by `send_timeout_ms`. A write that fails or times out
// leaves a partial packet on the wire, so the transport is torn down the same
// way as when the hub disconnects.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use radio_relay_protocol::{CommId, Packet, PacketCodec, Position, ProtocolError, RetryOnTimeout};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Upper bound on a single wait for the self position, so waiters re-check
/// liveness and stop requests even if a wakeup is missed.
const POSITION_WAIT_SLICE: Duration = Duration::from_millis(100);

pub struct AgentTransport {
    comm_id: CommId,
    codec: PacketCodec,
    /// Kept only to shut the socket down.
    socket: TcpStream,
    writer: Mutex<TcpStream>,
    shared: Arc<TransportShared>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

struct TransportShared {
    alive: AtomicBool,
    inbox: Mutex<Inbox>,
    self_position: Mutex<Option<Position>>,
    position_changed: Condvar,
}

#[derive(Default)]
struct Inbox {
    packets: Vec<Packet>,
    /// Packets received since the last drain.
    pending: usize,
}

impl AgentTransport {
    pub fn connect(config: &AgentConfig, comm_id: CommId) -> Result<Self, AgentError> {
        config.validate()?;
        if !comm_id.is_valid() {
            return Err(AgentError::InvalidConfig("comm_id must be positive".into()));
        }

        let addr = config.addr();
        let connect_err = |source| AgentError::Connect {
            addr: addr.clone(),
            source,
        };
        let socket = TcpStream::connect(&addr).map_err(connect_err)?;
        socket
            .set_read_timeout(Some(config.recv_timeout()))
            .map_err(connect_err)?;
        socket
            .set_write_timeout(Some(config.send_timeout()))
            .map_err(connect_err)?;
        socket.set_nodelay(true).map_err(connect_err)?;
        let mut writer = socket.try_clone().map_err(connect_err)?;
        let reader = socket.try_clone().map_err(connect_err)?;

        let codec = PacketCodec::new(config.byte_order);
        let handshake_err = |source| AgentError::Handshake { comm_id, source };
        codec
            .write_handshake(&mut writer, comm_id)
            .map_err(|e| handshake_err(ProtocolError::from(e)))?;
        if let Some(position) = config.initial_position {
            codec
                .write_packet(&mut writer, &Packet::position_only(comm_id, position))
                .map_err(handshake_err)?;
        }
        info!(%comm_id, %addr, "connected to relay");

        let shared = Arc::new(TransportShared {
            alive: AtomicBool::new(true),
            inbox: Mutex::new(Inbox::default()),
            self_position: Mutex::new(None),
            position_changed: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let max_pending = config.max_pending_packets;
        let reader_thread = thread::spawn(move || {
            receive_loop(comm_id, reader, codec, max_pending, thread_shared);
        });

        Ok(Self {
            comm_id,
            codec,
            socket,
            writer: Mutex::new(writer),
            shared,
            reader_thread: Mutex::new(Some(reader_thread)),
        })
    }

    pub fn comm_id(&self) -> CommId {
        self.comm_id
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Last position the hub echoed back, if any.
    pub fn self_position(&self) -> Option<Position> {
        *self.shared.self_position.lock()
    }

    /// Block until the hub has echoed a position. Returns `None` if the
    /// transport dies or `stop` is raised first.
    pub fn wait_for_position(&self, stop: &AtomicBool) -> Option<Position> {
        let mut position = self.shared.self_position.lock();
        loop {
            if let Some(p) = *position {
                return Some(p);
            }
            if !self.is_alive() || stop.load(Ordering::SeqCst) {
                return None;
            }
            self.shared
                .position_changed
                .wait_for(&mut position, POSITION_WAIT_SLICE);
        }
    }

    /// Wake every `wait_for_position` caller so it re-checks its stop flag.
    pub fn wake_waiters(&self) {
        let _guard = self.shared.self_position.lock();
        self.shared.position_changed.notify_all();
    }

    /// Take every packet received since the last drain, oldest first, and
    /// reset the pending count.
    pub fn drain_inbox(&self) -> Vec<Packet> {
        let mut inbox = self.shared.inbox.lock();
        inbox.pending = 0;
        std::mem::take(&mut inbox.packets)
    }

    pub fn send(&self, packet: &Packet) -> Result<(), AgentError> {
        if !self.is_alive() {
            return Err(AgentError::Stopped);
        }
        let mut writer = self.writer.lock();
        match self.codec.write_packet(&mut *writer, packet) {
            Ok(()) => Ok(()),
            Err(ProtocolError::Io(e)) => {
                warn!(comm_id = %self.comm_id, error = %e, "send failed, closing connection");
                self.shared.alive.store(false, Ordering::SeqCst);
                let _ = self.socket.shutdown(Shutdown::Both);
                self.shared.clear_position();
                Err(AgentError::Send(ProtocolError::Io(e)))
            }
            Err(e) => Err(AgentError::Send(e)),
        }
    }

    /// Tell the hub where this agent is without sending any messages.
    pub fn announce_position(&self, position: Position) -> Result<(), AgentError> {
        self.send(&Packet::position_only(self.comm_id, position))
    }

    /// Shut the connection down and join the receive thread. Idempotent.
    pub fn close(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().flush();
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.lock().take() {
            let _ = handle.join();
        }
        self.shared.clear_position();
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl TransportShared {
    fn clear_position(&self) {
        *self.self_position.lock() = None;
        self.position_changed.notify_all();
    }
}

fn receive_loop(
    comm_id: CommId,
    stream: TcpStream,
    codec: PacketCodec,
    max_pending: usize,
    shared: Arc<TransportShared>,
) {
    let flag = Arc::clone(&shared);
    let mut reader = BufReader::new(RetryOnTimeout::new(stream, move || {
        flag.alive.load(Ordering::SeqCst)
    }));

    loop {
        match codec.read_packet(&mut reader) {
            Ok(Some(packet)) if packet.sender == comm_id => {
                *shared.self_position.lock() = Some(packet.position);
                shared.position_changed.notify_all();
            }
            Ok(Some(packet)) => {
                let mut inbox = shared.inbox.lock();
                if inbox.pending >= max_pending {
                    warn!(%comm_id, max_pending, "inbox full, closing connection");
                    let _ = reader.get_ref().get_ref().shutdown(Shutdown::Both);
                    break;
                }
                inbox.pending += 1;
                inbox.packets.push(packet);
            }
            Ok(None) => {
                info!(%comm_id, "relay closed the connection");
                break;
            }
            Err(e) => {
                if shared.alive.load(Ordering::SeqCst) {
                    warn!(%comm_id, error = %e, "agent receive failed");
                } else {
                    debug!(%comm_id, "agent receive stopped");
                }
                break;
            }
        }
    }

    shared.alive.store(false, Ordering::SeqCst);
    shared.clear_position();
}
