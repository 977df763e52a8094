//! Message reassembly over a receive ring.
//!
//! A single receive may deliver part of a header, part of a payload, one
//! message, or several messages back to back. [`next_frame`] consumes the
//! bytes delivered by one receive call one message at a time and keeps the
//! cursor positioned so that the next receive continues the message in
//! flight.

use crate::message::{Message, EFFECTIVE_SIZE};
use crate::runtime::cursor::RecvCursor;

/// Outcome of one reassembly step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// All delivered bytes belong to an incomplete message.
    /// The cursor is ready for the next receive.
    Partial,
    /// A complete message lies at `start..start + len` in the ring.
    Complete { start: usize, len: usize },
    /// The header declares a length the ring cannot frame.
    Malformed { declared: usize },
}

/// Take the next message out of `nbytes` freshly received bytes.
///
/// On `Complete`, `nbytes` becomes the number of bytes past this message
/// still to be framed, and the caller should call again while it is
/// non-zero. On `Partial`,
/// `nbytes` drops to zero.
#[inline]
pub fn next_frame(cursor: &mut RecvCursor, nbytes: &mut usize) -> Frame {
    let offset = cursor.offset();
    let available = offset + *nbytes;

    if available < EFFECTIVE_SIZE {
        cursor.advance(*nbytes);
        *nbytes = 0;
        // Make sure the next receive can complete the header.
        if cursor.remaining() < EFFECTIVE_SIZE {
            cursor.require(EFFECTIVE_SIZE);
        }
        return Frame::Partial;
    }

    let declared = match Message::overlay(cursor.in_flight(*nbytes)) {
        Some(msg) => msg.length(),
        None => return Frame::Malformed { declared: 0 },
    };
    if declared < EFFECTIVE_SIZE || declared > cursor.max_message_size() {
        return Frame::Malformed { declared };
    }

    if available < declared {
        cursor.advance(*nbytes);
        *nbytes = 0;
        if cursor.remaining() < cursor.max_message_size() {
            cursor.require(declared);
        }
        return Frame::Partial;
    }

    let start = cursor.pos();
    *nbytes = available - declared;
    cursor.consume(declared);
    Frame::Complete {
        start,
        len: declared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::testing::frame;
    use crate::message::flags;

    /// Feed `chunks` through the framer the way the receive path does,
    /// returning the sequence numbers of the messages completed per chunk.
    fn feed(cursor: &mut RecvCursor, chunks: &[&[u8]]) -> Vec<Vec<u64>> {
        let mut out = Vec::new();
        for chunk in chunks {
            let mut done = Vec::new();
            let mut rest: &[u8] = chunk;
            while !rest.is_empty() {
                let window = cursor.window();
                let n = window.len().min(rest.len());
                window[..n].copy_from_slice(&rest[..n]);
                rest = &rest[n..];

                let mut nbytes = n;
                while nbytes > 0 {
                    match next_frame(cursor, &mut nbytes) {
                        Frame::Partial => {}
                        Frame::Complete { start, len } => {
                            let msg = Message::overlay(cursor.message(start, len)).unwrap();
                            assert_eq!(msg.length(), len);
                            done.push(msg.sequence());
                        }
                        Frame::Malformed { declared } => panic!("malformed {declared}"),
                    }
                }
                if cursor.offset() == 0 {
                    cursor.reset();
                }
            }
            out.push(done);
        }
        out
    }

    #[test]
    fn test_message_split_across_three_receives() {
        let mut cursor = RecvCursor::new(4096, 256);
        let msg = frame(1, flags::CLIENT, 40);

        let done = feed(&mut cursor, &[&msg[..10], &msg[10..20], &msg[20..]]);

        assert_eq!(done, vec![vec![], vec![], vec![1]]);
        assert!(cursor.is_reset());
    }

    #[test]
    fn test_two_messages_in_one_receive() {
        let mut cursor = RecvCursor::new(4096, 256);
        let mut bytes = frame(1, flags::CLIENT, 40);
        bytes.extend(frame(2, flags::CLIENT, 40));

        let window = cursor.window();
        window[..80].copy_from_slice(&bytes);
        let mut nbytes = 80;

        assert_eq!(
            next_frame(&mut cursor, &mut nbytes),
            Frame::Complete { start: 0, len: 40 }
        );
        assert_eq!(nbytes, 40);
        assert_eq!(
            next_frame(&mut cursor, &mut nbytes),
            Frame::Complete { start: 40, len: 40 }
        );
        assert_eq!(nbytes, 0);
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn test_partial_header_stretches_window_near_ring_end() {
        let mut cursor = RecvCursor::new(64, 64);

        // 60 bytes consumed, leaving 4 bytes before the end of the ring.
        let first = frame(1, flags::CLIENT, 60);
        let second = frame(2, flags::CLIENT, 48);
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..4]);

        let window = cursor.window();
        window[..64].copy_from_slice(&bytes);
        let mut nbytes = 64;
        assert!(matches!(
            next_frame(&mut cursor, &mut nbytes),
            Frame::Complete { start: 0, len: 60 }
        ));
        assert_eq!(next_frame(&mut cursor, &mut nbytes), Frame::Partial);

        // Window now covers exactly the rest of the header.
        assert_eq!(cursor.window().len(), EFFECTIVE_SIZE - 4);

        let done = feed(&mut cursor, &[&second[4..EFFECTIVE_SIZE], &second[EFFECTIVE_SIZE..]]);
        assert_eq!(done, vec![vec![], vec![2]]);
    }

    #[test]
    fn test_arbitrary_fragmentation_matches_single_receive() {
        let mut stream = Vec::new();
        for (seq, len) in [(1u64, 16usize), (2, 40), (3, 200), (4, 17), (5, 64)] {
            stream.extend(frame(seq, flags::CLIENT, len));
        }

        let mut whole = RecvCursor::new(1024, 256);
        let expected: Vec<u64> = feed(&mut whole, &[&stream]).concat();
        assert_eq!(expected, vec![1, 2, 3, 4, 5]);

        for chunk_size in 1..=stream.len() {
            let mut cursor = RecvCursor::new(1024, 256);
            let chunks: Vec<&[u8]> = stream.chunks(chunk_size).collect();
            let got: Vec<u64> = feed(&mut cursor, &chunks).concat();
            assert_eq!(got, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_declared_length_out_of_range() {
        let mut cursor = RecvCursor::new(1024, 256);

        let mut short = frame(1, flags::CLIENT, 40);
        short[12..16].copy_from_slice(&4u32.to_be_bytes());
        cursor.window()[..40].copy_from_slice(&short);
        let mut nbytes = 40;
        assert_eq!(
            next_frame(&mut cursor, &mut nbytes),
            Frame::Malformed { declared: 4 }
        );

        cursor.reset();
        let mut long = frame(1, flags::CLIENT, 40);
        long[12..16].copy_from_slice(&1000u32.to_be_bytes());
        cursor.window()[..40].copy_from_slice(&long);
        let mut nbytes = 40;
        assert_eq!(
            next_frame(&mut cursor, &mut nbytes),
            Frame::Malformed { declared: 1000 }
        );
    }
}
