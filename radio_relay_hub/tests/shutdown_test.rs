// Runs the `relay` binary and stops it with SIGTERM, checking that connected
// agents are disconnected and the process exits cleanly.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use radio_relay_protocol::{ByteOrder, CommId, PacketCodec};

#[test]
fn sigterm_closes_agents_and_exits() {
    let mut relay = Command::new(env!("CARGO_BIN_EXE_relay"))
        .args(["--host", "127.0.0.1", "--port", "0", "--clients", "2"])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(relay.stdout.take().unwrap());
    let mut banner = String::new();
    stdout.read_line(&mut banner).unwrap();
    let addr: SocketAddr = banner
        .trim()
        .strip_prefix("Relay listening on ")
        .unwrap()
        .parse()
        .unwrap();

    let mut agent = TcpStream::connect(addr).unwrap();
    PacketCodec::new(ByteOrder::Native)
        .write_handshake(&mut agent, CommId(1))
        .unwrap();
    // Let the hub register the session before stopping it.
    thread::sleep(Duration::from_millis(200));

    let status = Command::new("kill")
        .args(["-TERM", &relay.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    agent.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(agent.read(&mut buf).unwrap(), 0, "hub should close the agent");

    let start = Instant::now();
    let exit = loop {
        if let Some(exit) = relay.try_wait().unwrap() {
            break exit;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "relay did not exit");
        thread::sleep(Duration::from_millis(20));
    };
    assert!(exit.success());

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert!(rest.contains("Relay stopped."));
}
