// CLI entry point for the swarm radio relay.
//
// Starts a standalone hub that agents connect to, ticks it on an internal
// ticker thread, and exits once the hub stops (it shuts itself down when no
// agent is reachable any more). Ctrl+C or SIGTERM destroys the hub first, so
// every agent connection is closed before the process exits. See `hub.rs`
// for the forwarding algorithm.
//
// Usage:
//   relay [OPTIONS]
//     --config <FILE>     JSON config file (flags below override it)
//     --host <HOST>       Listen host (default: localhost)
//     --port <PORT>       Listen port (default: 8000)
//     --clients <N>       Number of agents to wait for (default: 1)
//     --range <DIST>      Neighbor range (default: 1.7)
//     --tick-hz <HZ>      Tick frequency, 0 = as fast as possible (default: 50)
//
// Logging goes through `tracing`; set `RUST_LOG` to adjust (default `info`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use radio_relay_hub::{RelayConfig, RelayHub};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Tick frequency when neither the config file nor the flags set one.
const DEFAULT_TICK_HZ: f64 = 50.0;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();

    let mut hub = match RelayHub::start(config) {
        Ok(hub) => hub,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    };

    println!("Relay listening on {}", hub.local_addr());
    println!("Press Ctrl+C to stop.");

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "could not install signal handler");
    }

    while hub.is_alive() && !interrupted.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }
    if interrupted.load(Ordering::SeqCst) {
        println!("\nShutting down...");
    }
    hub.destroy();
    println!("Relay stopped.");
}

/// Parse command-line arguments into a `RelayConfig`. Uses simple
/// `std::env::args()` matching.
fn parse_args() -> RelayConfig {
    let args: Vec<String> = std::env::args().collect();

    // The config file is the base layer, so find it before applying flags.
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).unwrap_or_else(|| {
                eprintln!("--config requires a file path");
                std::process::exit(1);
            });
            RelayConfig::load(path).unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            })
        }
        None => RelayConfig::default(),
    };
    if config.tick_hz.is_none() {
        config.tick_hz = Some(DEFAULT_TICK_HZ);
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
            }
            "--host" => {
                i += 1;
                config.host = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--host requires a value");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                config.port = parse_value(&args, i, "--port requires a valid port number");
            }
            "--clients" => {
                i += 1;
                config.expected_clients =
                    parse_value(&args, i, "--clients requires a positive number");
            }
            "--range" => {
                i += 1;
                config.neighbor_range = parse_value(&args, i, "--range requires a distance");
            }
            "--tick-hz" => {
                i += 1;
                config.tick_hz = Some(parse_value(&args, i, "--tick-hz requires a frequency"));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    config
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, message: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{message}");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>     JSON config file (flags override it)");
    println!("  --host <HOST>       Listen host (default: localhost)");
    println!("  --port <PORT>       Listen port (default: 8000)");
    println!("  --clients <N>       Number of agents to wait for (default: 1)");
    println!("  --range <DIST>      Neighbor range (default: 1.7)");
    println!("  --tick-hz <HZ>      Tick frequency, 0 = as fast as possible (default: 50)");
    println!("  --help, -h          Show this help");
}
