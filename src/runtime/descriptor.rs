//! Descriptor table: per-socket state for every open socket.
//!
//! Listening sockets, accepted connections, and datagram sockets each own
//! one slot. Slot keys double as readiness tokens, so a key freed by a
//! teardown is reused by the next accept.

use crate::runtime::cursor::RecvCursor;
use slab::Slab;
use std::net::SocketAddr;

/// Transport semantics of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockKind {
    Stream,
    Datagram,
}

/// Fixed-size list of connections accepted by one listener.
///
/// Entries are slot keys into the owning [`DescriptorTable`]; they locate a
/// connection for teardown and never keep it alive.
#[derive(Debug)]
pub struct ActiveList {
    slots: Box<[Option<usize>]>,
    count: usize,
}

impl ActiveList {
    pub fn new(max_active: usize) -> Self {
        Self {
            slots: vec![None; max_active].into_boxed_slice(),
            count: 0,
        }
    }

    /// Store `id` in the first free slot.
    ///
    /// Returns `false` if the list is full.
    pub fn register(&mut self, id: usize) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(id);
                self.count += 1;
                true
            }
            None => false,
        }
    }

    /// Clear the slot holding `id`.
    ///
    /// Returns `false` if `id` is not in the list.
    pub fn remove(&mut self, id: usize) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(id)) {
            Some(slot) => {
                *slot = None;
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: usize) -> bool {
        self.slots.iter().any(|slot| *slot == Some(id))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }
}

/// State of one open socket.
#[derive(Debug)]
pub struct DescriptorRecord<E> {
    /// The socket itself. Dropping the record closes it.
    pub endpoint: E,
    pub kind: SockKind,
    /// Local address for listeners, peer address for connections,
    /// group address for multicast receivers.
    pub addr: SocketAddr,
    pub is_multicast: bool,
    /// Multicast receivers reply to the sender rather than the group.
    pub reply_via_unicast: bool,
    pub cursor: RecvCursor,
    /// Listener slot this connection was accepted on.
    pub listener: Option<usize>,
    /// Accepted connections, present only on listening sockets.
    pub active: Option<ActiveList>,
}

impl<E> DescriptorRecord<E> {
    /// Record for a listening stream socket.
    pub fn listener(endpoint: E, addr: SocketAddr, max_active: usize) -> Self {
        Self {
            endpoint,
            kind: SockKind::Stream,
            addr,
            is_multicast: false,
            reply_via_unicast: false,
            cursor: RecvCursor::empty(),
            listener: None,
            active: Some(ActiveList::new(max_active)),
        }
    }

    /// Record for a connection accepted on slot `listener`.
    pub fn connection(endpoint: E, peer: SocketAddr, listener: usize, cursor: RecvCursor) -> Self {
        Self {
            endpoint,
            kind: SockKind::Stream,
            addr: peer,
            is_multicast: false,
            reply_via_unicast: false,
            cursor,
            listener: Some(listener),
            active: None,
        }
    }

    /// Record for a bound datagram socket.
    pub fn datagram(
        endpoint: E,
        addr: SocketAddr,
        is_multicast: bool,
        reply_via_unicast: bool,
        cursor: RecvCursor,
    ) -> Self {
        Self {
            endpoint,
            kind: SockKind::Datagram,
            addr,
            is_multicast,
            reply_via_unicast,
            cursor,
            listener: None,
            active: None,
        }
    }

    pub fn is_listener(&self) -> bool {
        self.active.is_some()
    }
}

/// Registry of open sockets using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
#[derive(Debug)]
pub struct DescriptorTable<E> {
    records: Slab<DescriptorRecord<E>>,
}

impl<E> DescriptorTable<E> {
    pub fn new() -> Self {
        Self {
            records: Slab::new(),
        }
    }

    /// Insert a record, returning its descriptor id.
    pub fn insert(&mut self, record: DescriptorRecord<E>) -> usize {
        self.records.insert(record)
    }

    pub fn get(&self, id: usize) -> Option<&DescriptorRecord<E>> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut DescriptorRecord<E>> {
        self.records.get_mut(id)
    }

    /// Release a record, closing its socket.
    pub fn remove(&mut self, id: usize) -> Option<DescriptorRecord<E>> {
        self.records.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.records.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of every open descriptor.
    pub fn ids(&self) -> Vec<usize> {
        self.records.iter().map(|(id, _)| id).collect()
    }
}

impl<E> Default for DescriptorTable<E> {
    fn default() -> Self {
        Self::new()
    }
}
