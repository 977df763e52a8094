//! Readiness multiplexing.
//!
//! A multiplexer blocks until at least one registered descriptor is ready
//! to read, then reports the ready descriptor ids. Strategies:
//!
//! - `QueueMultiplexer`: kernel event queue via mio (epoll on Linux,
//!   kqueue on macOS)
//! - `ScanMultiplexer`: `poll(2)` over the registered set
//!
//! The server is generic over [`Multiplexer`], so the strategy is fixed at
//! startup and calls are statically dispatched.

mod queue;
mod scan;

pub use queue::QueueMultiplexer;
pub use scan::ScanMultiplexer;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Waits for registered descriptors to become readable.
pub trait Multiplexer {
    /// Start watching `fd` for readability, reporting it as `id`.
    fn register(&mut self, id: usize, fd: RawFd) -> io::Result<()>;

    /// Stop reporting `id`.
    ///
    /// Called after the descriptor has been closed, so implementations
    /// must not touch the old file descriptor.
    fn forget(&mut self, id: usize);

    /// Block until a descriptor is ready or `timeout` elapses, replacing the
    /// contents of `ready` with the ids of ready descriptors.
    ///
    /// An interrupted wait returns `Ok` with nothing ready.
    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<usize>) -> io::Result<()>;

    /// Number of descriptors being watched.
    fn len(&self) -> usize;
}
