// Hub-side state for one agent connection.
//
// A `Session` is created by the hub's acceptor once the 4-byte comm_id
// handshake has been read. It owns the write half of the socket and a receive
// thread that decodes packets from the read half into a lock-protected inbox.
// The hub empties the inbox once per tick with `drain()`.
//
// Receive thread lifecycle:
// - Socket read timeouts are retried (via `RetryOnTimeout`) for as long as the
//   session is alive; they only exist so the thread notices `close()`.
// - An orderly close (EOF at a packet boundary) or any protocol/I/O fault ends
//   the loop and clears the liveness flag.
// - The thread never closes the socket itself. The hub reaps dead sessions
//   and calls `close()` from its serialized tick path, so a socket is never
//   shut down underneath a send that is still in progress.
//
// The inbox also remembers the position of the most recent packet, so the hub
// can learn where an agent is before it starts draining and forwarding.

use std::io::{self, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use radio_relay_protocol::{CommId, Packet, PacketCodec, Position, RetryOnTimeout};
use tracing::{debug, info, warn};

/// One connected agent, as seen by the hub.
pub struct Session {
    comm_id: CommId,
    writer: TcpStream,
    shared: Arc<SessionShared>,
    reader_thread: Option<JoinHandle<()>>,
}

struct SessionShared {
    inbox: Mutex<Inbox>,
    alive: AtomicBool,
}

#[derive(Default)]
struct Inbox {
    packets: Vec<Packet>,
    reported: Option<Position>,
}

impl Session {
    /// Start the receive thread for a connection whose handshake has already
    /// been consumed from `stream`.
    pub fn spawn(
        comm_id: CommId,
        stream: TcpStream,
        codec: PacketCodec,
        recv_timeout: Duration,
        send_timeout: Duration,
    ) -> io::Result<Self> {
        stream.set_read_timeout(Some(recv_timeout))?;
        stream.set_write_timeout(Some(send_timeout))?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;

        let shared = Arc::new(SessionShared {
            inbox: Mutex::new(Inbox::default()),
            alive: AtomicBool::new(true),
        });
        let thread_shared = Arc::clone(&shared);
        let reader_thread = thread::Builder::new()
            .name(format!("relay-session-{comm_id}"))
            .spawn(move || receive_loop(comm_id, reader_stream, codec, thread_shared))?;

        Ok(Self {
            comm_id,
            writer: stream,
            shared,
            reader_thread: Some(reader_thread),
        })
    }

    pub fn comm_id(&self) -> CommId {
        self.comm_id
    }

    /// False once the receive loop has ended (peer closed, fault, or
    /// `close()`).
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Atomically take every packet received since the last drain, in arrival
    /// order.
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut self.shared.inbox.lock().packets)
    }

    /// Position of the most recent packet received since the last call, if
    /// any.
    pub fn take_reported_position(&self) -> Option<Position> {
        self.shared.inbox.lock().reported.take()
    }

    /// Write pre-encoded packet bytes to the agent.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Stop the receive thread and shut the socket down. Idempotent.
    pub fn close(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        let _ = self.writer.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receive thread: decode packets into the inbox until the connection ends.
fn receive_loop(
    comm_id: CommId,
    stream: TcpStream,
    codec: PacketCodec,
    shared: Arc<SessionShared>,
) {
    let flag = Arc::clone(&shared);
    let mut reader = BufReader::new(RetryOnTimeout::new(stream, move || {
        flag.alive.load(Ordering::SeqCst)
    }));

    loop {
        match codec.read_packet(&mut reader) {
            Ok(Some(packet)) => {
                let mut inbox = shared.inbox.lock();
                inbox.reported = Some(packet.position);
                inbox.packets.push(packet);
            }
            Ok(None) => {
                info!(%comm_id, "agent closed its connection");
                break;
            }
            Err(e) => {
                if shared.alive.load(Ordering::SeqCst) {
                    warn!(%comm_id, error = %e, "session receive failed");
                } else {
                    debug!(%comm_id, "session receive stopped");
                }
                break;
            }
        }
    }

    shared.alive.store(false, Ordering::SeqCst);
}
