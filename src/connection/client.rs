//! Client-side connection: the asynchronous read loop.
//!
//! A [`ClientConnection`] wraps a [`ServerConnection`] (so all write APIs
//! are available) and adds a demultiplexing read loop: header, cookie
//! gate, payload, then the caller's message handler. The handler decides
//! when the next read is armed by calling
//! [`process_messages`](ClientConnection::process_messages) again, which
//! lets it defer re-arming until dependent work completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{error, warn};

use crate::config::TransportConfig;
use crate::error::{FramepipeError, Result};
use crate::io_util;
use crate::protocol::{FrameHeader, HEADER_SIZE};
use crate::transport::LocalStream;

use super::server::{ServerConnection, WriteCompletion};

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Invoked once per fully read frame, with the frame's type and payload.
///
/// The read loop does not re-arm itself; the handler (or work it spawns)
/// must call [`ClientConnection::process_messages`] to continue reading.
pub type MessageHandler = Box<dyn Fn(Arc<ClientConnection>, i64, Bytes) + Send + Sync + 'static>;

/// Invoked when the read path fails. Terminal for this connection: the
/// read loop does not re-arm after delivering the error.
pub type ConnectionErrorHandler =
    Box<dyn Fn(Arc<ClientConnection>, FramepipeError) + Send + Sync + 'static>;

/// Connection to a client process, with a message-handler read loop on top
/// of the [`ServerConnection`] write surface.
pub struct ClientConnection {
    server: Arc<ServerConnection>,
    /// Flips false to true exactly once, via [`register`](Self::register).
    /// Governs how a cookie mismatch is treated.
    registered: AtomicBool,
    message_handler: MessageHandler,
    connection_error_handler: ConnectionErrorHandler,
    debug_label: String,
    message_type_enum_names: Vec<String>,
}

impl ClientConnection {
    /// Take ownership of a connected stream and build the connection.
    ///
    /// `debug_label` identifies the peer in diagnostics.
    /// `message_type_enum_names` optionally maps numeric frame types to
    /// names for those diagnostics; empty means types render as integers.
    pub fn create(
        message_handler: MessageHandler,
        connection_error_handler: ConnectionErrorHandler,
        stream: LocalStream,
        debug_label: String,
        message_type_enum_names: Vec<String>,
        config: TransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            server: ServerConnection::create(stream, config),
            registered: AtomicBool::new(false),
            message_handler,
            connection_error_handler,
            debug_label,
            message_type_enum_names,
        })
    }

    /// The wrapped write-side connection.
    pub fn server(&self) -> &Arc<ServerConnection> {
        &self.server
    }

    /// The label used in diagnostics for this connection.
    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    /// Mark the peer as handshaken.
    ///
    /// After this, a cookie mismatch on the read loop is treated as a
    /// fatal invariant violation instead of a stray local process.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn register(&self) {
        let was_registered = self.registered.swap(true, Ordering::SeqCst);
        assert!(
            !was_registered,
            "connection {} registered twice",
            self.debug_label
        );
    }

    /// Forward of [`ServerConnection::write_message`].
    pub async fn write_message(&self, message_type: i64, payload: &[u8]) -> Result<()> {
        self.server.write_message(message_type, payload).await
    }

    /// Forward of [`ServerConnection::read_message`].
    pub async fn read_message(&self, expected_type: i64) -> Result<Vec<u8>> {
        self.server.read_message(expected_type).await
    }

    /// Forward of [`ServerConnection::write_message_async`].
    pub fn write_message_async(
        &self,
        message_type: i64,
        payload: &[u8],
        completion: WriteCompletion,
    ) {
        ServerConnection::write_message_async(&self.server, message_type, payload, completion)
    }

    /// Forward of [`ServerConnection::close`].
    pub async fn close(&self) {
        self.server.close().await
    }

    /// Forward of [`ServerConnection::debug_string`].
    pub fn debug_string(&self) -> String {
        self.server.debug_string()
    }

    /// The underlying file descriptor.
    #[cfg(unix)]
    pub fn native_handle(&self) -> RawFd {
        self.server.native_handle()
    }

    /// Arm one read of a full frame.
    ///
    /// The frame is delivered to the message handler; read errors go to
    /// the connection-error handler instead, and the loop stops. At most
    /// one read is outstanding at a time: the next one is armed only when
    /// the handler calls this again.
    pub fn process_messages(self: &Arc<Self>) {
        // The read task holds a strong handle so the connection outlives
        // the completion.
        let conn = Arc::clone(self);
        tokio::spawn(async move { conn.read_round().await });
    }

    async fn read_round(self: Arc<Self>) {
        let config = self.server.config();
        let (message_type, payload) = {
            let mut reader = self.server.reader().lock().await;

            let header = {
                let _timer = self
                    .server
                    .event_stats()
                    .map(|s| s.record_start("client_connection.async_read.header"));
                let mut raw = [0u8; HEADER_SIZE];
                if let Err(err) = io_util::read_exact(&mut *reader, &mut raw).await {
                    drop(reader);
                    return (self.connection_error_handler)(Arc::clone(&self), err.into());
                }
                FrameHeader::decode(&raw)
            };

            if header.cookie != self.server.cookie() {
                drop(reader);
                return self.handle_cookie_mismatch(header.cookie).await;
            }
            if let Err(err) = header.validate_length(config.max_read_length) {
                drop(reader);
                return (self.connection_error_handler)(Arc::clone(&self), err);
            }

            self.server.add_bytes_read(header.length as u64);
            let mut payload = vec![0u8; header.length as usize];
            {
                let _timer = self
                    .server
                    .event_stats()
                    .map(|s| s.record_start("client_connection.async_read.payload"));
                if let Err(err) = io_util::read_exact(&mut *reader, &mut payload).await {
                    drop(reader);
                    return (self.connection_error_handler)(Arc::clone(&self), err.into());
                }
            }
            (header.message_type, Bytes::from(payload))
        };

        let start = Instant::now();
        (self.message_handler)(Arc::clone(&self), message_type, payload);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > config.handler_warning_timeout_ms {
            warn!(
                "[{}] message handler for type {} took {} ms",
                self.debug_label,
                self.message_type_name(message_type),
                elapsed_ms
            );
        }
    }

    /// A wrong cookie from a handshaken peer is an invariant violation;
    /// from an unknown local process it is noise: log, close, stop reading.
    async fn handle_cookie_mismatch(self: &Arc<Self>, received: i64) {
        let expected = self.server.cookie();
        if self.registered.load(Ordering::SeqCst) {
            error!(
                "cookie mismatch for received message: received {:#018x}, expected {:#018x}, debug label: {}",
                received, expected, self.debug_label
            );
            std::process::abort();
        }
        warn!(
            "cookie mismatch for received message: received {:#018x}, expected {:#018x}, debug label: {}; closing connection",
            received, expected, self.debug_label
        );
        self.server.close().await;
    }

    fn message_type_name(&self, message_type: i64) -> String {
        usize::try_from(message_type)
            .ok()
            .and_then(|idx| self.message_type_enum_names.get(idx).cloned())
            .unwrap_or_else(|| message_type.to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::LocalStream;

    fn noop_connection(names: Vec<String>) -> Arc<ClientConnection> {
        let (a, _b) = LocalStream::pair().unwrap();
        ClientConnection::create(
            Box::new(|_conn, _ty, _payload| {}),
            Box::new(|_conn, _err| {}),
            a,
            "test".to_string(),
            names,
            TransportConfig::default(),
        )
    }

    #[tokio::test]
    async fn type_name_falls_back_to_number() {
        let conn = noop_connection(vec!["Zero".into(), "One".into()]);
        assert_eq!(conn.message_type_name(0), "Zero");
        assert_eq!(conn.message_type_name(1), "One");
        assert_eq!(conn.message_type_name(7), "7");
        assert_eq!(conn.message_type_name(-3), "-3");
    }

    #[tokio::test]
    async fn type_name_with_no_names_is_numeric() {
        let conn = noop_connection(Vec::new());
        assert_eq!(conn.message_type_name(42), "42");
    }

    #[tokio::test]
    #[should_panic(expected = "registered twice")]
    async fn double_register_panics() {
        let conn = noop_connection(Vec::new());
        conn.register();
        conn.register();
    }
}
