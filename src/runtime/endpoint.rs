//! Transport primitives and socket preparation.
//!
//! The data path only needs a handful of byte-level operations from a
//! socket, captured by [`Endpoint`]. [`NetEndpoint`] implements them over
//! non-blocking std sockets configured with socket2.

use crate::config::Transport;
use crate::runtime::cursor::RecvCursor;
use crate::runtime::descriptor::DescriptorRecord;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// Byte-level socket operations used by the receive and reply path.
pub trait Endpoint: Sized {
    /// Receive into `buf`.
    ///
    /// `Ok((0, _))` is an orderly close by the peer of a stream socket.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send `buf` to `addr`. Stream sockets ignore `addr`.
    ///
    /// Never blocks: a stream send stops early once the socket's send
    /// buffer is full and returns the count written so far.
    /// `Ok(0)` means the peer has closed the connection.
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Accept a pending connection on a listening socket.
    fn accept(&mut self) -> io::Result<(Self, SocketAddr)>;

    fn raw_fd(&self) -> RawFd;
}

/// Whether an I/O error means the peer is gone rather than "try later".
pub fn peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// A non-blocking socket.
#[derive(Debug)]
pub enum NetEndpoint {
    Listener { listener: TcpListener, nodelay: bool },
    Stream { stream: TcpStream, peer: SocketAddr },
    Datagram(UdpSocket),
}

impl Endpoint for NetEndpoint {
    #[inline]
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self {
            NetEndpoint::Stream { stream, peer } => Ok((stream.read(buf)?, *peer)),
            NetEndpoint::Datagram(socket) => socket.recv_from(buf),
            NetEndpoint::Listener { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "receive on listening socket",
            )),
        }
    }

    #[inline]
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match self {
            NetEndpoint::Stream { stream, peer } => {
                let mut sent = 0;
                while sent < buf.len() {
                    match stream.write(&buf[sent..]) {
                        Ok(0) => return Ok(0),
                        Ok(n) => sent += n,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // Send buffer full: the peer is not reading.
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            if sent == 0 {
                                return Err(e);
                            }
                            debug!(peer = %peer, sent, len = buf.len(), "Reply truncated");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(sent)
            }
            NetEndpoint::Datagram(socket) => socket.send_to(buf, addr),
            NetEndpoint::Listener { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "send on listening socket",
            )),
        }
    }

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)> {
        match self {
            NetEndpoint::Listener { listener, nodelay } => {
                let (stream, peer) = listener.accept()?;
                stream.set_nonblocking(true)?;
                stream.set_nodelay(*nodelay)?;
                Ok((NetEndpoint::Stream { stream, peer }, peer))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "accept on non-listening socket",
            )),
        }
    }

    fn raw_fd(&self) -> RawFd {
        match self {
            NetEndpoint::Listener { listener, .. } => listener.as_raw_fd(),
            NetEndpoint::Stream { stream, .. } => stream.as_raw_fd(),
            NetEndpoint::Datagram(socket) => socket.as_raw_fd(),
        }
    }
}

/// Socket settings applied when preparing a descriptor.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub transport: Transport,
    pub multicast_interface: Ipv4Addr,
    pub reply_via_unicast: bool,
    pub tcp_nodelay: bool,
    pub ring_capacity: usize,
    pub max_message_size: usize,
    pub max_active_fds: usize,
}

impl NetEndpoint {
    /// Bind a socket for `addr` and wrap it in a descriptor record.
    ///
    /// Stream transports produce a listener; datagram transports produce a
    /// bound receiver, joined to the group when `addr` is multicast.
    pub fn prepare(
        addr: SocketAddr,
        opts: &SocketOptions,
    ) -> io::Result<DescriptorRecord<NetEndpoint>> {
        let addr = match addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "only IPv4 addresses are supported",
                ))
            }
        };

        match opts.transport {
            Transport::Tcp => {
                let listener = create_listener(addr)?;
                let local = listener.local_addr()?;
                let endpoint = NetEndpoint::Listener {
                    listener,
                    nodelay: opts.tcp_nodelay,
                };
                Ok(DescriptorRecord::listener(endpoint, local, opts.max_active_fds))
            }
            Transport::Udp => {
                let is_multicast = addr.ip().is_multicast();
                let socket = create_datagram(addr, is_multicast, opts.multicast_interface)?;
                let fixed = if is_multicast {
                    SocketAddr::V4(addr)
                } else {
                    socket.local_addr()?
                };
                Ok(DescriptorRecord::datagram(
                    NetEndpoint::Datagram(socket),
                    fixed,
                    is_multicast,
                    opts.reply_via_unicast,
                    RecvCursor::new(opts.ring_capacity, opts.max_message_size),
                ))
            }
        }
    }
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// Create a non-blocking UDP socket, joining `addr` if it is a group.
fn create_datagram(
    addr: SocketAddrV4,
    is_multicast: bool,
    interface: Ipv4Addr,
) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    if is_multicast {
        let any = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port());
        socket.bind(&SocketAddr::V4(any).into())?;
        socket.join_multicast_v4(addr.ip(), &interface)?;
    } else {
        socket.bind(&SocketAddr::V4(addr).into())?;
    }

    Ok(socket.into())
}
