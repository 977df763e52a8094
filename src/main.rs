//! rttperf: server side of a network latency/throughput benchmark
//!
//! Receives benchmark messages over TCP or UDP (unicast or multicast),
//! reassembles them across arbitrary fragmentation, and answers ping
//! requests in place with minimal per-message overhead.
//!
//! Features:
//! - Pipelined and fragmented message framing over a per-socket ring
//! - Server and bridge reply modes, unicast or group replies for multicast
//! - epoll/kqueue or poll(2) readiness multiplexing
//! - Optional activity logging and per-peer sequence gap detection
//! - Configuration via CLI arguments or TOML file

mod config;
mod message;
mod policy;
mod runtime;

use config::Config;
use runtime::ExitSignal;
use std::sync::atomic::AtomicBool;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Raised by SIGINT/SIGTERM.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, std::sync::atomic::Ordering::Relaxed);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, on_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as *const () as libc::sighandler_t);
    }

    info!(
        listen = ?config.listen,
        transport = ?config.transport,
        mode = ?config.mode,
        mux = ?config.mux,
        max_message_size = config.max_message_size,
        "Starting rttperf server"
    );

    runtime::run(&config, ExitSignal::new(&SHUTDOWN))?;
    Ok(())
}
