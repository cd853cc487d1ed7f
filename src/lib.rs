//! # framepipe
//!
//! Bidirectional, length-prefixed message transport over a local stream
//! socket (Unix domain socket on POSIX, named pipe on Windows), used by a
//! cluster worker daemon to exchange framed control messages with
//! co-located client processes.
//!
//! ## Architecture
//!
//! - **Framing**: every message is a 24-byte header (`cookie`,
//!   `message_type`, `length`, three host-endian `i64`s) plus `length`
//!   payload bytes. The cookie guards against cross-version or
//!   cross-process framing collisions.
//! - **Write pipeline**: [`ServerConnection`] offers complete-before-return
//!   framed writes and an asynchronous FIFO with at most one in-flight
//!   gather-write, configurable coalescing, per-message completions, and
//!   sticky broken-pipe short-circuiting.
//! - **Read loop**: [`ClientConnection`] delivers `(type, bytes)` frames
//!   to a message handler that re-arms the loop itself, which makes the
//!   hand-off a backpressure control point.
//! - **Disconnect sweep**: [`check_for_client_disconnects`] asks the
//!   kernel which of N peers hung up with a single syscall.
//!
//! ## Example
//!
//! ```ignore
//! use framepipe::{ServerConnection, TransportConfig};
//! use framepipe::transport::connect_with_retry;
//!
//! #[tokio::main]
//! async fn main() -> framepipe::Result<()> {
//!     let config = TransportConfig::default();
//!     let stream = connect_with_retry("/tmp/worker.sock", -1, -1, &config).await?;
//!     let conn = ServerConnection::create(stream, config);
//!
//!     conn.write_message_async(7, b"hello", Box::new(|status| {
//!         if let Err(err) = status {
//!             eprintln!("delivery failed: {err}");
//!         }
//!     }));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod stats;
pub mod transport;

mod io_util;

pub use config::TransportConfig;
pub use connection::{
    check_for_client_disconnects, ClientConnection, ConnectionErrorHandler, MessageHandler,
    ServerConnection, WriteCompletion,
};
pub use error::{FramepipeError, Result};
pub use protocol::{FrameHeader, HEADER_SIZE};
