//! Connection management for stream listeners.
//!
//! Accepted connections are tracked in their listener's bounded active
//! list. A connection enters the table only through [`accept`] and leaves
//! it only through [`teardown`].

use crate::runtime::cursor::RecvCursor;
use crate::runtime::descriptor::{DescriptorRecord, DescriptorTable};
use crate::runtime::endpoint::Endpoint;
use crate::runtime::server::Context;
use std::io;
use tracing::{debug, error, warn};

/// Result of one accept attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// A new connection was registered under this descriptor id.
    New(usize),
    /// A connection was accepted and closed because the listener is full.
    Rejected,
    /// Nothing left to accept.
    Drained,
}

/// Accept one pending connection on `listener`.
///
/// Callers loop until [`Accepted::Drained`].
pub fn accept<E: Endpoint>(ctx: &mut Context<E>, listener: usize) -> Accepted {
    let Some(record) = ctx.table.get_mut(listener) else {
        return Accepted::Drained;
    };

    let (endpoint, peer) = match record.endpoint.accept() {
        Ok(accepted) => accepted,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Accepted::Drained,
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Accepted::Drained,
        Err(e) => {
            error!(listener, error = %e, "Accept error");
            return Accepted::Drained;
        }
    };

    let full = record.active.as_ref().map_or(true, |active| active.is_full());
    if full {
        warn!(listener, peer = %peer, "Active connection limit reached, rejecting");
        drop(endpoint);
        return Accepted::Rejected;
    }

    let cursor = RecvCursor::new(ctx.ring_capacity, ctx.max_message_size);
    let id = ctx
        .table
        .insert(DescriptorRecord::connection(endpoint, peer, listener, cursor));

    let registered = ctx
        .table
        .get_mut(listener)
        .and_then(|record| record.active.as_mut())
        .map_or(false, |active| active.register(id));
    if !registered {
        // Unreachable while the capacity check above holds.
        ctx.table.remove(id);
        return Accepted::Rejected;
    }

    debug!(listener, id, peer = %peer, "Accepted connection");
    Accepted::New(id)
}

/// Close connection `id` and release its slot.
///
/// Returns `false` if `id` was not an open connection.
pub fn teardown<E>(table: &mut DescriptorTable<E>, id: usize) -> bool {
    let Some(record) = table.get(id) else {
        return false;
    };
    let peer = record.addr;
    let listener = record.listener;

    let listed = listener
        .and_then(|l| table.get_mut(l))
        .and_then(|record| record.active.as_mut())
        .map_or(false, |active| active.remove(id));
    if !listed {
        warn!(id, peer = %peer, "Closing connection missing from its listener");
    }

    table.remove(id);
    debug!(id, peer = %peer, "Peer address closed");
    true
}
