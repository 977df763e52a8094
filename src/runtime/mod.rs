//! Single-threaded, readiness-driven benchmark server runtime.
//!
//! - `descriptor`: per-socket state in a slab-backed table
//! - `cursor`: receive ring with bounds-checked cursor
//! - `framer`: message reassembly across arbitrary fragmentation
//! - `reply`: receive-then-reply path per ready socket
//! - `connection`: accept and teardown of stream connections
//! - `mux`: interchangeable readiness multiplexers
//! - `server`: init / loop / cleanup lifecycle
//!
//! The multiplexer and both policies are picked here, once, and the server
//! is monomorphized over the chosen combination.

mod connection;
mod cursor;
mod descriptor;
mod endpoint;
mod framer;
mod mux;
mod reply;
mod server;

#[cfg(test)]
mod testing;

pub use server::ExitSignal;

use crate::config::{Config, MuxType};
use crate::policy::{
    ActivityInfo, ActivityTracker, GapCalculator, GapDetector, NoActivity, NoGaps,
};
use descriptor::DescriptorTable;
use endpoint::{NetEndpoint, SocketOptions};
use mux::{Multiplexer, QueueMultiplexer, ScanMultiplexer};
use server::{Context, Server};
use std::io;
use tracing::info;

/// Events returned per readiness wait by the queue multiplexer.
const EVENT_BATCH: usize = 1024;

/// Prepare every configured socket and serve until `exit` is raised.
pub fn run(config: &Config, exit: ExitSignal) -> io::Result<()> {
    let opts = SocketOptions {
        transport: config.transport,
        multicast_interface: config.mc_rx_if,
        reply_via_unicast: config.force_unicast_reply,
        tcp_nodelay: config.tcp_nodelay,
        ring_capacity: config.ring_capacity,
        max_message_size: config.max_message_size,
        max_active_fds: config.max_active_fds,
    };

    let mut table = DescriptorTable::new();
    for &addr in &config.listen {
        table.insert(NetEndpoint::prepare(addr, &opts)?);
    }

    let ctx = Context::new(
        table,
        exit,
        config.mode,
        config.ring_capacity,
        config.max_message_size,
    );

    info!(mux = ?config.mux, activity = config.activity, detect_gaps = config.detect_gaps, "Starting runtime");
    match config.mux {
        MuxType::Queue => with_mux(ctx, QueueMultiplexer::new(EVENT_BATCH)?, config),
        MuxType::Scan => with_mux(ctx, ScanMultiplexer::new(), config),
    }
}

fn with_mux<M: Multiplexer>(
    ctx: Context<NetEndpoint>,
    mux: M,
    config: &Config,
) -> io::Result<()> {
    if config.activity > 0 {
        with_activity(ctx, mux, ActivityInfo::new(config.activity), config)
    } else {
        with_activity(ctx, mux, NoActivity, config)
    }
}

fn with_activity<M: Multiplexer, A: ActivityTracker>(
    ctx: Context<NetEndpoint>,
    mux: M,
    activity: A,
    config: &Config,
) -> io::Result<()> {
    if config.detect_gaps {
        serve(ctx, mux, activity, GapDetector::new(), config)
    } else {
        serve(ctx, mux, activity, NoGaps, config)
    }
}

fn serve<M, A, G>(
    ctx: Context<NetEndpoint>,
    mux: M,
    activity: A,
    gaps: G,
    config: &Config,
) -> io::Result<()>
where
    M: Multiplexer,
    A: ActivityTracker,
    G: GapCalculator,
{
    Server::new(ctx, mux, activity, gaps, config.poll_timeout).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, Transport};
    use crate::message::testing::ping;
    use crate::message::Message;
    use crate::runtime::testing::exit_signal;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream, UdpSocket};
    use std::thread;
    use std::time::Duration;

    fn config(transport: Transport, mux: MuxType, addr: SocketAddr) -> Config {
        Config {
            listen: vec![addr],
            transport,
            mode: Mode::Server,
            mux,
            mc_rx_if: std::net::Ipv4Addr::UNSPECIFIED,
            force_unicast_reply: false,
            tcp_nodelay: true,
            poll_timeout: Some(Duration::from_millis(10)),
            ring_capacity: 8192,
            max_message_size: 1024,
            max_active_fds: 4,
            activity: 1,
            detect_gaps: true,
            log_level: "info".to_string(),
        }
    }

    /// Reserve a free loopback port for `transport`.
    fn free_addr(transport: Transport) -> SocketAddr {
        match transport {
            Transport::Udp => UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap(),
            Transport::Tcp => std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap(),
        }
    }

    fn udp_ping_pong(mux: MuxType) {
        let addr = free_addr(Transport::Udp);
        let cfg = config(Transport::Udp, mux, addr);
        let exit = exit_signal();
        let server = thread::spawn(move || run(&cfg, exit));

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        // Retry until the server socket is bound.
        let mut buf = [0u8; 1024];
        let mut reply = None;
        for _ in 0..50 {
            client.send_to(&ping(42, 64), addr).unwrap();
            if let Ok((n, from)) = client.recv_from(&mut buf) {
                reply = Some((buf[..n].to_vec(), from));
                break;
            }
        }
        exit.raise();
        server.join().unwrap().unwrap();

        let (reply, from) = reply.expect("no reply from server");
        assert_eq!(from, addr);
        assert_eq!(reply.len(), 64);
        let msg = Message::overlay(&reply).unwrap();
        assert!(msg.is_server());
        assert_eq!(msg.sequence(), 42);
    }

    #[test]
    fn test_udp_ping_pong_queue() {
        udp_ping_pong(MuxType::Queue);
    }

    #[test]
    fn test_udp_ping_pong_scan() {
        udp_ping_pong(MuxType::Scan);
    }

    #[test]
    fn test_tcp_fragmented_ping_pong() {
        let addr = free_addr(Transport::Tcp);
        let cfg = config(Transport::Tcp, MuxType::Queue, addr);
        let exit = exit_signal();
        let server = thread::spawn(move || run(&cfg, exit));

        let mut stream = (0..100)
            .find_map(|_| {
                TcpStream::connect(addr).ok().or_else(|| {
                    thread::sleep(Duration::from_millis(10));
                    None
                })
            })
            .expect("server never listened");
        stream.set_nodelay(true).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let request = ping(7, 40);
        stream.write_all(&request[..10]).unwrap();
        thread::sleep(Duration::from_millis(20));
        stream.write_all(&request[10..20]).unwrap();
        thread::sleep(Duration::from_millis(20));
        stream.write_all(&request[20..]).unwrap();

        let mut reply = [0u8; 40];
        stream.read_exact(&mut reply).unwrap();
        drop(stream);

        exit.raise();
        server.join().unwrap().unwrap();

        let msg = Message::overlay(&reply).unwrap();
        assert!(msg.is_server());
        assert_eq!(msg.sequence(), 7);
        assert_eq!(&reply[16..], &request[16..]);
    }
}
