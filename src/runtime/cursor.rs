//! Per-descriptor receive ring and its cursor.
//!
//! The ring is a fixed allocation of `capacity + slack` bytes, where the
//! slack equals the maximum message size. Messages are received back to
//! back starting at the origin; once every received byte has been consumed
//! the write position wraps back to the origin.
//!
//! The slack lets the message in flight run past `capacity` without ever
//! being split or copied: whenever the space left before `capacity` is too
//! small to finish the current header or message, the receive window is
//! stretched to exactly the missing bytes, which always fit in the slack.

/// Receive cursor over an owned ring buffer.
///
/// Tracks the start of the message being assembled (`pos`), how many of
/// its bytes have arrived (`offset`), and how many more bytes the next
/// receive may write (`remaining`). Positions are indices, so no accessor
/// can produce a view outside the allocation.
#[derive(Debug)]
pub struct RecvCursor {
    buf: Box<[u8]>,
    capacity: usize,
    max_message_size: usize,
    pos: usize,
    remaining: usize,
    offset: usize,
}

impl RecvCursor {
    /// Create a cursor over a fresh ring.
    ///
    /// # Arguments
    /// * `capacity` - Ring size in bytes, at least `max_message_size`
    /// * `max_message_size` - Largest message accepted; also the slack size
    pub fn new(capacity: usize, max_message_size: usize) -> Self {
        debug_assert!(capacity >= max_message_size, "ring smaller than a message");
        Self {
            buf: vec![0u8; capacity + max_message_size].into_boxed_slice(),
            capacity,
            max_message_size,
            pos: 0,
            remaining: capacity,
            offset: 0,
        }
    }

    /// A zero-sized cursor for descriptors that never receive data.
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    /// Region the next receive call may write into.
    #[inline]
    pub fn window(&mut self) -> &mut [u8] {
        let start = (self.pos + self.offset).min(self.buf.len());
        let end = (start + self.remaining).min(self.buf.len());
        &mut self.buf[start..end]
    }

    /// Bytes of the in-flight message received so far, plus `extra` more.
    #[inline]
    pub fn in_flight(&self, extra: usize) -> &[u8] {
        let end = (self.pos + self.offset + extra).min(self.buf.len());
        &self.buf[self.pos..end]
    }

    /// Mutable access to the bytes of a consumed message.
    #[inline]
    pub fn message_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.buf[start..start + len]
    }

    #[inline]
    pub fn message(&self, start: usize, len: usize) -> &[u8] {
        &self.buf[start..start + len]
    }

    /// Record `nbytes` more bytes of the in-flight message.
    #[inline]
    pub fn advance(&mut self, nbytes: usize) {
        self.offset += nbytes;
        self.remaining = self.remaining.saturating_sub(nbytes);
    }

    /// Size the window so that it ends exactly after `total` message bytes.
    #[inline]
    pub fn require(&mut self, total: usize) {
        self.remaining = total.saturating_sub(self.offset);
    }

    /// Consume the complete in-flight message of `len` bytes.
    ///
    /// `offset` may exceed `len` when bytes past this message were kept by
    /// [`hold`](Self::hold); those bytes move back into the window.
    #[inline]
    pub fn consume(&mut self, len: usize) {
        self.remaining = (self.remaining + self.offset).saturating_sub(len);
        self.pos += len;
        self.offset = 0;
    }

    /// Keep `nbytes` received but unframed bytes for the next receive.
    ///
    /// The in-flight bytes plus `nbytes` are moved to the origin and stay
    /// in flight; the window opens right after them, up to `capacity`.
    pub fn hold(&mut self, nbytes: usize) {
        let held = self.offset + nbytes;
        debug_assert!(held < self.capacity, "held bytes fill the ring");
        self.buf.copy_within(self.pos..self.pos + held, 0);
        self.pos = 0;
        self.offset = held;
        self.remaining = self.capacity.saturating_sub(held);
    }

    /// Wrap back to the origin with the full capacity available.
    #[inline]
    pub fn reset(&mut self) {
        self.pos = 0;
        self.remaining = self.capacity;
        self.offset = 0;
    }

    #[inline]
    pub fn is_reset(&self) -> bool {
        self.pos == 0 && self.offset == 0 && self.remaining == self.capacity
    }

    /// Start of the in-flight message.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
