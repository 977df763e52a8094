//! Benchmark message wire format.
//!
//! Every message starts with a fixed header of [`EFFECTIVE_SIZE`] bytes,
//! followed by an opaque payload:
//!
//! ```text
//!  0               8        10       12               16
//! +---------------+--------+--------+----------------+--------------
//! | sequence (u64)| flags  | rsvd   | length (u32)   | payload ...
//! +---------------+--------+--------+----------------+--------------
//! ```
//!
//! All fields are big-endian. `length` is the total message length,
//! header included. Fields are read straight out of the receive buffer;
//! [`Message`] and [`MessageMut`] are views, never copies.

/// Size of the fixed message header in bytes.
pub const EFFECTIVE_SIZE: usize = 16;

/// Largest message that fits in a single IPv4 UDP datagram.
pub const MAX_MESSAGE_SIZE: usize = 65_507;

const SEQUENCE: std::ops::Range<usize> = 0..8;
const FLAGS: std::ops::Range<usize> = 8..10;
const LENGTH: std::ops::Range<usize> = 12..16;

/// Header flag bits.
pub mod flags {
    /// Sent by a benchmarking client.
    pub const CLIENT: u16 = 0x0001;
    /// Client expects an immediate reply.
    pub const PONG_REQUEST: u16 = 0x0002;
    /// Warmup sentinel, excluded from counting.
    pub const WARMUP: u16 = 0x0004;
    /// Sent by a server.
    pub const SERVER: u16 = 0x0008;
}

/// Read-only view of a message laid over received bytes.
#[derive(Clone, Copy)]
pub struct Message<'a> {
    buf: &'a [u8],
}

impl<'a> Message<'a> {
    /// Overlay a message view on `buf`.
    ///
    /// Returns `None` if `buf` cannot hold a complete header.
    #[inline]
    pub fn overlay(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < EFFECTIVE_SIZE {
            return None;
        }
        Some(Self { buf })
    }

    /// Declared total length of the message, header included.
    #[inline]
    pub fn length(&self) -> usize {
        u32::from_be_bytes(field(self.buf, LENGTH)) as usize
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        u64::from_be_bytes(field(self.buf, SEQUENCE))
    }

    #[inline]
    pub fn flags(&self) -> u16 {
        u16::from_be_bytes(field(self.buf, FLAGS))
    }

    #[inline]
    pub fn is_client(&self) -> bool {
        self.flags() & flags::CLIENT != 0
    }

    #[inline]
    #[allow(dead_code)]
    pub fn is_server(&self) -> bool {
        self.flags() & flags::SERVER != 0
    }

    #[inline]
    pub fn is_pong_request(&self) -> bool {
        self.flags() & flags::PONG_REQUEST != 0
    }

    #[inline]
    pub fn is_warmup(&self) -> bool {
        self.flags() & flags::WARMUP != 0
    }
}

/// Mutable view of a message, used to turn a request into its reply in place.
pub struct MessageMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> MessageMut<'a> {
    #[inline]
    pub fn overlay(buf: &'a mut [u8]) -> Option<Self> {
        if buf.len() < EFFECTIVE_SIZE {
            return None;
        }
        Some(Self { buf })
    }

    #[inline]
    pub fn as_message(&self) -> Message<'_> {
        Message { buf: self.buf }
    }

    /// Mark the message as server-originated.
    #[inline]
    pub fn set_server(&mut self) {
        let flags = (self.as_message().flags() & !flags::CLIENT) | flags::SERVER;
        self.buf[FLAGS].copy_from_slice(&flags.to_be_bytes());
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }
}

#[inline(always)]
fn field<const N: usize>(buf: &[u8], range: std::ops::Range<usize>) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[range]);
    out
}
