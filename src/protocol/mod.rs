//! Protocol module - the frame header codec.
//!
//! A frame is a 24-byte header (`cookie`, `message_type`, `length`, three
//! host-endian `i64`s) followed by `length` payload bytes. The codec is
//! stateless; cookie enforcement lives on the connections.

mod wire_format;

pub use wire_format::{FrameHeader, HEADER_SIZE};
