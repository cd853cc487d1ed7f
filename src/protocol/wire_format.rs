//! Wire format encoding and decoding.
//!
//! Implements the 24-byte frame header:
//! ```text
//! ┌──────────┬──────────────┬──────────┐
//! │ Cookie   │ Message type │ Length   │
//! │ 8 bytes  │ 8 bytes      │ 8 bytes  │
//! │ i64      │ i64          │ i64      │
//! └──────────┴──────────────┴──────────┘
//! ```
//! followed by exactly `length` payload bytes. There is no frame
//! terminator and no alignment padding.
//!
//! Integers are host-endian: sender and receiver are co-located on the
//! same host by construction, this channel never crosses a machine
//! boundary.

use crate::error::{FramepipeError, Result};

/// Header size in bytes (fixed, exactly 24).
pub const HEADER_SIZE: usize = 24;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Process-wide cookie identifying compatible peers.
    pub cookie: i64,
    /// Message type, opaque to the transport.
    pub message_type: i64,
    /// Payload length in bytes. Non-negative in any well-formed frame.
    pub length: i64,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(cookie: i64, message_type: i64, length: i64) -> Self {
        Self {
            cookie,
            message_type,
            length,
        }
    }

    /// Encode the header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..8].copy_from_slice(&self.cookie.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.message_type.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.length.to_ne_bytes());
    }

    /// Decode a header from an exact-size buffer.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[0..8]);
        let cookie = i64::from_ne_bytes(word);
        word.copy_from_slice(&buf[8..16]);
        let message_type = i64::from_ne_bytes(word);
        word.copy_from_slice(&buf[16..24]);
        let length = i64::from_ne_bytes(word);
        Self {
            cookie,
            message_type,
            length,
        }
    }

    /// Decode a header from a byte slice.
    ///
    /// Returns `None` if the slice is too short.
    pub fn try_decode(buf: &[u8]) -> Option<Self> {
        let exact: &[u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::decode(exact))
    }

    /// Validate the declared payload length against a cap.
    ///
    /// Rejects negative lengths before any allocation, and lengths above
    /// `max` to keep a hostile peer from forcing unbounded allocation.
    pub fn validate_length(&self, max: i64) -> Result<()> {
        if self.length < 0 {
            return Err(FramepipeError::NegativeLength(self.length));
        }
        if self.length > max {
            return Err(FramepipeError::FrameTooLarge {
                length: self.length,
                max,
            });
        }
        Ok(())
    }
}
