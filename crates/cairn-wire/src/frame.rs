//! Length-delimited framing for the non-blocking transport.
//!
//! A frame is a 4-byte big-endian length header followed by that many bytes
//! of envelope JSON. The blocking transport does not use frames; it writes
//! one envelope per connection and the receiver reads to end-of-stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Size of the frame length header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum accepted frame body size.
///
/// Serialized abstract states for one block stay far below this; anything
/// larger indicates a corrupted length header.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A single length-delimited frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Wraps an encoded envelope body.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// The frame body (envelope JSON).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total encoded size of this frame, header included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body.len()
    }

    /// Appends the encoded frame to the buffer.
    ///
    /// Bodies larger than [`MAX_FRAME_SIZE`] are rejected here, symmetric
    /// with [`Frame::decode`].
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.body.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: self.body.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        buf.reserve(self.encoded_len());
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
        Ok(())
    }

    /// Attempts to decode one frame from the front of the buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete frame;
    /// the caller keeps accumulating bytes and retries. Consumes the frame's
    /// bytes from the buffer on success.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(len).freeze();
        Ok(Some(Frame { body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_frame() {
        let frame = Frame::new(&b"{\"type\":\"Error\"}"[..]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body(), b"{\"type\":\"Error\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_yields_none() {
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn partial_body_yields_none_and_keeps_bytes() {
        let frame = Frame::new(&b"abcdef"[..]);
        let mut full = BytesMut::new();
        frame.encode(&mut full).unwrap();

        // Deliver all but the last byte.
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        // Deliver the rest; decoding now succeeds.
        buf.put_u8(full[full.len() - 1]);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body(), b"abcdef");
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        Frame::new(&b"one"[..]).encode(&mut buf).unwrap();
        Frame::new(&b"two"[..]).encode(&mut buf).unwrap();

        let a = Frame::decode(&mut buf).unwrap().unwrap();
        let b = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(a.body(), b"one");
        assert_eq!(b.body(), b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_body_rejected_at_encode() {
        let frame = Frame::new(vec![0u8; MAX_FRAME_SIZE + 1]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            frame.encode(&mut buf),
            Err(WireError::FrameTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_length_header_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(WireError::FrameTooLarge { .. })
        ));
    }
}
