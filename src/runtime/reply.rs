//! Receive-then-reply path for a ready data socket.
//!
//! One receive call per readiness notification. Every complete message in
//! the received bytes is handled in order:
//!
//! - non-client messages and warmups are consumed without a reply and stop
//!   processing of the batch; bytes after them are kept for the next receive
//! - client data messages bump the receive counter, are answered in place
//!   when they request a pong, and are reported to the policies

use crate::config::Mode;
use crate::message::{Message, MessageMut};
use crate::policy::{ActivityTracker, GapCalculator};
use crate::runtime::connection::teardown;
use crate::runtime::cursor::RecvCursor;
use crate::runtime::descriptor::SockKind;
use crate::runtime::endpoint::{peer_closed, Endpoint};
use crate::runtime::framer::{next_frame, Frame};
use crate::runtime::server::Context;
use std::io;
use tracing::{debug, trace, warn};

/// Receive on descriptor `id` and reply to whatever requests arrived.
///
/// Returns `true` only when the descriptor was torn down, meaning `id` no
/// longer refers to an open socket.
#[inline]
pub fn process<E, A, G>(ctx: &mut Context<E>, id: usize, activity: &mut A, gaps: &mut G) -> bool
where
    E: Endpoint,
    A: ActivityTracker,
    G: GapCalculator,
{
    let Some(record) = ctx.table.get_mut(id) else {
        return false;
    };
    let kind = record.kind;

    let (mut nbytes, peer) = match record.endpoint.recv_from(record.cursor.window()) {
        Ok((0, _)) => {
            if kind == SockKind::Stream {
                teardown(&mut ctx.table, id);
                return true;
            }
            return false;
        }
        Ok(received) => received,
        Err(ref e) if kind == SockKind::Stream && peer_closed(e) => {
            debug!(id, error = %e, "Receive failed, peer gone");
            teardown(&mut ctx.table, id);
            return true;
        }
        Err(ref e) => {
            if e.kind() != io::ErrorKind::WouldBlock {
                trace!(id, error = %e, "Receive failed");
            }
            return false;
        }
    };

    while nbytes > 0 {
        let (start, len) = match next_frame(&mut record.cursor, &mut nbytes) {
            Frame::Complete { start, len } => (start, len),
            Frame::Partial => return false,
            Frame::Malformed { declared } => {
                warn!(id, peer = %peer, declared, "Malformed message length");
                if kind == SockKind::Stream {
                    teardown(&mut ctx.table, id);
                    return true;
                }
                record.cursor.reset();
                return false;
            }
        };

        if ctx.exit.is_set() {
            return false;
        }

        let (is_client, is_warmup, is_pong_request, sequence) = {
            let Some(msg) = Message::overlay(record.cursor.message(start, len)) else {
                return false;
            };
            (msg.is_client(), msg.is_warmup(), msg.is_pong_request(), msg.sequence())
        };
        trace!(id, peer = %peer, sequence, len, "Message");

        if !is_client {
            settle(&mut record.cursor, nbytes);
            return false;
        }

        if is_warmup {
            gaps.execute(peer, 0, true);
            settle(&mut record.cursor, nbytes);
            return false;
        }

        ctx.receive_count += 1;

        if is_pong_request {
            let Some(mut reply) = MessageMut::overlay(record.cursor.message_mut(start, len)) else {
                return false;
            };
            if ctx.mode != Mode::Bridge {
                reply.set_server();
            }

            let dest = if !record.is_multicast || record.reply_via_unicast {
                peer
            } else {
                record.addr
            };

            let closed = match record.endpoint.send_to(reply.as_bytes(), dest) {
                Ok(0) => true,
                Ok(_) => false,
                Err(ref e) if peer_closed(e) => true,
                Err(ref e) => {
                    debug!(id, dest = %dest, error = %e, "Reply failed");
                    false
                }
            };
            if closed && kind == SockKind::Stream {
                teardown(&mut ctx.table, id);
                return true;
            }
        }

        gaps.execute(peer, sequence, false);
        activity.execute(ctx.receive_count);
    }

    record.cursor.reset();
    false
}

/// Reset the cursor if every received byte was consumed, otherwise keep
/// the unframed remainder for the next receive.
#[inline]
fn settle(cursor: &mut RecvCursor, nbytes: usize) {
    if nbytes == 0 {
        cursor.reset();
    } else {
        cursor.hold(nbytes);
    }
}
