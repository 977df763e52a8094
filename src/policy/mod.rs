//! Per-message policies plugged into the server.
//!
//! Both policies are chosen once at startup and the server is generic over
//! them, so the disabled variants compile down to nothing on the hot path.
//!
//! - `ActivityTracker`: notified with the running receive count
//! - `GapCalculator`: notified with each message's sender and sequence number

mod activity;
mod gaps;

pub use activity::{ActivityInfo, NoActivity};
pub use gaps::{GapDetector, NoGaps};

use std::net::SocketAddr;

/// Observes the number of client messages received so far.
pub trait ActivityTracker {
    /// Called once per processed client data message.
    fn execute(&mut self, receive_count: u64);

    /// Log a summary at shutdown.
    fn report(&self) {}
}

/// Tracks sequence numbers per peer to detect loss and reordering.
pub trait GapCalculator {
    /// Called once per processed client message.
    ///
    /// A `warmup` call seeds the peer's state; its sequence number is
    /// ignored and it never counts as loss.
    fn execute(&mut self, peer: SocketAddr, sequence: u64, warmup: bool);

    /// Log a summary at shutdown.
    fn report(&self) {}
}
