//! Error types for framepipe.

use thiserror::Error;

/// Main error type for all framepipe operations.
///
/// The enum is `Clone` so that a single write status can be fanned out to
/// every completion in a coalesced batch. I/O errors are therefore carried
/// as rendered messages rather than `std::io::Error` values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramepipeError {
    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer side of the stream is gone. Sticky on the async write path.
    #[error("broken pipe")]
    BrokenPipe,

    /// Connection torn down with messages still queued.
    #[error("connection closed")]
    ConnectionClosed,

    /// Inbound frame carried a cookie other than the configured one.
    #[error("cookie mismatch for received message: received {received:#018x}, expected {expected:#018x}")]
    CookieMismatch { received: i64, expected: i64 },

    /// Inbound frame type differs from what the reader asked for.
    #[error("connection corrupted: expected message type {expected}, received message type {received}")]
    TypeMismatch { expected: i64, received: i64 },

    /// Header declared a negative payload length.
    #[error("negative frame payload length {0}")]
    NegativeLength(i64),

    /// Header declared a payload larger than the configured read cap.
    #[error("frame payload length {length} exceeds maximum {max}")]
    FrameTooLarge { length: i64, max: i64 },
}

impl FramepipeError {
    /// Whether this is the latched broken-pipe state of a write pipeline.
    #[inline]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, FramepipeError::BrokenPipe)
    }
}

impl From<std::io::Error> for FramepipeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe => FramepipeError::BrokenPipe,
            _ => FramepipeError::Io(err.to_string()),
        }
    }
}

/// Result type alias using FramepipeError.
pub type Result<T> = std::result::Result<T, FramepipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_kind_maps_to_dedicated_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "epipe");
        let err: FramepipeError = io.into();
        assert!(err.is_broken_pipe());
    }

    #[test]
    fn other_io_kinds_map_to_io_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "enoent");
        let err: FramepipeError = io.into();
        assert!(matches!(err, FramepipeError::Io(_)));
        assert!(err.to_string().contains("enoent"));
    }

    #[test]
    fn status_is_cloneable_for_batched_completions() {
        let err = FramepipeError::CookieMismatch {
            received: 0,
            expected: 0x0123_4567_89AB_CDEF,
        };
        let copies = vec![err.clone(), err.clone(), err];
        assert_eq!(copies[0], copies[2]);
    }
}
