//! Stream framing for the companion protocol.
//!
//! Every payload travels inside a length-prefixed frame:
//! ```text
//! ┌──────────┬──────────────┬─────────────────┐
//! │  0x3c    │  size (LE)   │    payload      │
//! │  1 byte  │   2 bytes    │   size bytes    │
//! └──────────┴──────────────┴─────────────────┘
//! ```
//! The decoder tolerates partial reads and accepts any header byte,
//! matching observed firmware behavior.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Frame header byte.
pub const FRAME_HEADER: u8 = 0x3c;

/// Maximum frame payload size (64KB - 1).
pub const MAX_FRAME_SIZE: usize = 65535;

/// Header plus 2-byte length.
pub const FRAME_OVERHEAD: usize = 3;

/// Wraps a payload in a framed message.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.put_u8(FRAME_HEADER);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Incremental frame decoder for a raw byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds raw bytes into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to extract the next complete frame payload.
    ///
    /// Returns `None` when more data is needed. The header byte is
    /// not validated; only the length field matters, and any declared
    /// length fits the 2-byte field.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < FRAME_OVERHEAD {
            return None;
        }

        let length = u16::from_le_bytes([self.buffer[1], self.buffer[2]]) as usize;
        if self.buffer.len() < FRAME_OVERHEAD + length {
            return None;
        }

        self.buffer.advance(FRAME_OVERHEAD);
        Some(self.buffer.split_to(length).freeze())
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered data (used on reconnect).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prefixes_header_and_length() {
        let frame = encode(b"ping").unwrap();
        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(frame[1], 4);
        assert_eq!(frame[2], 0);
        assert_eq!(&frame[3..], b"ping");
    }

    #[test]
    fn decode_across_partial_reads() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x3c, 0x05, 0x00, b'h', b'e']);
        assert_eq!(decoder.next_frame(), None);

        decoder.feed(b"llo");
        assert_eq!(decoder.next_frame(), Some(Bytes::from_static(b"hello")));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decode_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x3c, 0x02, 0x00, b'h', b'i', 0x3c, 0x03, 0x00, b'b', b'y', b'e']);

        assert_eq!(decoder.next_frame(), Some(Bytes::from_static(b"hi")));
        assert_eq!(decoder.next_frame(), Some(Bytes::from_static(b"bye")));
        assert_eq!(decoder.next_frame(), None);
    }

    #[test]
    fn decode_ignores_header_byte() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x7e, 0x02, 0x00, b'o', b'k']);
        assert_eq!(decoder.next_frame(), Some(Bytes::from_static(b"ok")));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            encode(&payload),
            Err(FrameError::TooLarge { .. })
        ));
    }
}
