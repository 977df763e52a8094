//! In-memory endpoint and multiplexer for driving the data path in tests.

use crate::config::Mode;
use crate::runtime::descriptor::DescriptorTable;
use crate::runtime::endpoint::Endpoint;
use crate::runtime::mux::Multiplexer;
use crate::runtime::server::{Context, ExitSignal};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

pub type SentLog = Rc<RefCell<Vec<(Vec<u8>, SocketAddr)>>>;

static NEXT_FD: AtomicI32 = AtomicI32::new(1000);

/// A fresh exit signal, not shared with any other test.
pub fn exit_signal() -> ExitSignal {
    ExitSignal::new(Box::leak(Box::new(AtomicBool::new(false))))
}

/// Empty context with a 4 KiB ring and 256-byte messages.
pub fn context() -> Context<ScriptedEndpoint> {
    Context::new(DescriptorTable::new(), exit_signal(), Mode::Server, 4096, 256)
}

/// Endpoint replaying scripted receive results.
///
/// Each scripted chunk is delivered by one receive call; bytes that do not
/// fit the caller's buffer stay queued for the next call, the way a stream
/// socket behaves.
#[derive(Debug)]
pub struct ScriptedEndpoint {
    peer: SocketAddr,
    /// `None` is an orderly close.
    recv: VecDeque<Option<Vec<u8>>>,
    accepts: VecDeque<ScriptedEndpoint>,
    sent: SentLog,
    send_error: Option<io::ErrorKind>,
    fd: RawFd,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::with_peer("127.0.0.1:40000".parse().unwrap())
    }

    pub fn with_peer(peer: SocketAddr) -> Self {
        Self {
            peer,
            recv: VecDeque::new(),
            accepts: VecDeque::new(),
            sent: Rc::new(RefCell::new(Vec::new())),
            send_error: None,
            fd: NEXT_FD.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn push_recv(&mut self, bytes: &[u8]) {
        self.recv.push_back(Some(bytes.to_vec()));
    }

    pub fn push_close(&mut self) {
        self.recv.push_back(None);
    }

    pub fn push_accept(&mut self, endpoint: ScriptedEndpoint) {
        self.accepts.push_back(endpoint);
    }

    /// Make every send fail with `kind`.
    pub fn fail_sends(&mut self, kind: io::ErrorKind) {
        self.send_error = Some(kind);
    }

    /// Shared log of everything sent through this endpoint.
    pub fn sent(&self) -> SentLog {
        Rc::clone(&self.sent)
    }
}

impl Endpoint for ScriptedEndpoint {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.recv.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(None) => Ok((0, self.peer)),
            Some(Some(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.recv.push_front(Some(bytes[n..].to_vec()));
                }
                Ok((n, self.peer))
            }
        }
    }

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if let Some(kind) = self.send_error {
            return Err(kind.into());
        }
        self.sent.borrow_mut().push((buf.to_vec(), addr));
        Ok(buf.len())
    }

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)> {
        match self.accepts.pop_front() {
            Some(endpoint) => {
                let peer = endpoint.peer;
                Ok((endpoint, peer))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// Multiplexer replaying scripted wakeups.
///
/// Once the script runs out it raises the attached exit signal, or fails
/// if none is attached so a broken test cannot spin forever.
#[derive(Default)]
pub struct ScriptedMux {
    wakeups: VecDeque<Vec<usize>>,
    registered: Vec<usize>,
    fail_next: bool,
    exit: Option<ExitSignal>,
}

impl ScriptedMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ready(&mut self, ids: Vec<usize>) {
        self.wakeups.push_back(ids);
    }

    pub fn fail_next_wait(&mut self) {
        self.fail_next = true;
    }

    pub fn raise_when_drained(&mut self, exit: ExitSignal) {
        self.exit = Some(exit);
    }
}

impl Multiplexer for ScriptedMux {
    fn register(&mut self, id: usize, _fd: RawFd) -> io::Result<()> {
        self.registered.push(id);
        Ok(())
    }

    fn forget(&mut self, id: usize) {
        self.registered.retain(|&i| i != id);
    }

    fn wait(&mut self, _timeout: Option<Duration>, ready: &mut Vec<usize>) -> io::Result<()> {
        ready.clear();
        if std::mem::take(&mut self.fail_next) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted failure"));
        }
        match self.wakeups.pop_front() {
            Some(ids) => {
                ready.extend(ids.into_iter().filter(|id| self.registered.contains(id)));
                Ok(())
            }
            None => match self.exit {
                Some(exit) => {
                    exit.raise();
                    Ok(())
                }
                None => Err(io::Error::new(io::ErrorKind::Other, "script exhausted")),
            },
        }
    }

    fn len(&self) -> usize {
        self.registered.len()
    }
}
