//! Server-side connection: framed synchronous I/O plus the asynchronous
//! write pipeline.
//!
//! A [`ServerConnection`] exclusively owns a connected [`LocalStream`] and
//! offers two write surfaces:
//!
//! - [`write_message`](ServerConnection::write_message) /
//!   [`read_message`](ServerConnection::read_message): complete-before-return
//!   framed transfers with transparent `EINTR` retry.
//! - [`write_message_async`](ServerConnection::write_message_async): an
//!   unbounded FIFO of pending messages flushed by at most one in-flight
//!   gather-write at a time, with per-message completion callbacks.
//!
//! The pipeline latches broken pipe: once the kernel reports it, nothing
//! is written to the socket again and every pending and future message
//! completes with that failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

use crate::config::TransportConfig;
use crate::error::{FramepipeError, Result};
use crate::io_util;
use crate::protocol::{FrameHeader, HEADER_SIZE};
use crate::stats::EventStats;
use crate::transport::{LocalReadHalf, LocalStream, LocalWriteHalf};

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Completion callback for one asynchronously enqueued message.
///
/// Called exactly once: with `Ok(())` after the kernel accepted every byte
/// of the message, or with the failure that ended it (broken pipe, another
/// I/O error, or `ConnectionClosed` when the connection is dropped with
/// the message still queued).
pub type WriteCompletion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Queue length beyond which exponentially spaced warnings are emitted.
const WRITE_QUEUE_WARN_THRESHOLD: usize = 1000;

/// One queued outbound message: pre-encoded header, payload copy, and the
/// caller's completion.
struct AsyncWriteBuffer {
    header: [u8; HEADER_SIZE],
    payload: Bytes,
    completion: Option<WriteCompletion>,
}

impl Drop for AsyncWriteBuffer {
    fn drop(&mut self) {
        // Backstop for a flush round torn down mid-write (executor
        // shutdown): the completion still fires exactly once.
        if let Some(completion) = self.completion.take() {
            completion(Err(FramepipeError::ConnectionClosed));
        }
    }
}

#[derive(Default)]
struct WriteQueue {
    queue: VecDeque<AsyncWriteBuffer>,
    /// True iff exactly one flush task is outstanding for this connection.
    in_flight: bool,
    /// Latched on the first broken-pipe write error.
    broken_pipe: bool,
}

/// Write side of a connection to a co-located peer process.
pub struct ServerConnection {
    reader: AsyncMutex<LocalReadHalf>,
    writer: AsyncMutex<LocalWriteHalf>,
    write_queue: Mutex<WriteQueue>,
    config: TransportConfig,
    stats: Option<Arc<EventStats>>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    sync_writes: AtomicU64,
    async_writes: AtomicU64,
    #[cfg(unix)]
    fd: RawFd,
}

impl ServerConnection {
    /// Take ownership of a connected stream.
    pub fn create(stream: LocalStream, config: TransportConfig) -> Arc<Self> {
        #[cfg(unix)]
        let fd = stream.raw_fd();
        let stats = config
            .event_stats
            .then(|| Arc::new(EventStats::new()));
        let (reader, writer) = stream.into_split();
        Arc::new(Self {
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            write_queue: Mutex::new(WriteQueue::default()),
            config,
            stats,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            sync_writes: AtomicU64::new(0),
            async_writes: AtomicU64::new(0),
            #[cfg(unix)]
            fd,
        })
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The cookie embedded in outgoing frames and required on inbound ones.
    pub fn cookie(&self) -> i64 {
        self.config.cookie
    }

    /// The stats sink, when `event_stats` is enabled.
    pub fn event_stats(&self) -> Option<&Arc<EventStats>> {
        self.stats.as_ref()
    }

    /// The underlying file descriptor.
    #[cfg(unix)]
    pub fn native_handle(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn reader(&self) -> &AsyncMutex<LocalReadHalf> {
        &self.reader
    }

    pub(crate) fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    /// Write one frame, returning once the kernel has accepted every byte.
    ///
    /// `ErrorKind::Interrupted` is retried transparently. The write
    /// counters are bumped before the I/O is attempted; they are
    /// best-effort observational values.
    pub async fn write_message(&self, message_type: i64, payload: &[u8]) -> Result<()> {
        self.sync_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let header =
            FrameHeader::new(self.config.cookie, message_type, payload.len() as i64).encode();
        let mut writer = self.writer.lock().await;
        io_util::write_all_vectored(&mut *writer, &[&header, payload]).await?;
        Ok(())
    }

    /// Read one frame of the given type, returning its payload.
    ///
    /// Fails with [`FramepipeError::CookieMismatch`] when the peer's cookie
    /// differs from the configured one, and with
    /// [`FramepipeError::TypeMismatch`] when the frame type is not
    /// `expected_type`. `ErrorKind::Interrupted` is retried transparently.
    pub async fn read_message(&self, expected_type: i64) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;

        let mut raw = [0u8; HEADER_SIZE];
        io_util::read_exact(&mut *reader, &mut raw).await?;
        let header = FrameHeader::decode(&raw);

        if header.cookie != self.config.cookie {
            return Err(FramepipeError::CookieMismatch {
                received: header.cookie,
                expected: self.config.cookie,
            });
        }
        if header.message_type != expected_type {
            return Err(FramepipeError::TypeMismatch {
                expected: expected_type,
                received: header.message_type,
            });
        }
        header.validate_length(self.config.max_read_length)?;

        let mut payload = vec![0u8; header.length as usize];
        io_util::read_exact(&mut *reader, &mut payload).await?;
        Ok(payload)
    }

    /// Enqueue one frame for asynchronous delivery.
    ///
    /// The payload is captured by copy. Completions run in the enqueue
    /// order, on the flush task. Enqueueing is permitted from any thread;
    /// ordering is as observed at enqueue time under the queue lock.
    pub fn write_message_async(
        self: &Arc<Self>,
        message_type: i64,
        payload: &[u8],
        completion: WriteCompletion,
    ) {
        self.async_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let header = FrameHeader::new(self.config.cookie, message_type, payload.len() as i64);
        let buffer = AsyncWriteBuffer {
            header: header.encode(),
            payload: Bytes::copy_from_slice(payload),
            completion: Some(completion),
        };

        let start_round = {
            let mut state = self.write_queue.lock().unwrap();
            state.queue.push_back(buffer);
            let queued = state.queue.len();
            if queued > WRITE_QUEUE_WARN_THRESHOLD && queued.is_power_of_two() {
                warn!(queued, "connection has {queued} buffered async writes");
            }
            if state.in_flight {
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_round {
            // The flush task holds a strong handle so the connection (and
            // its socket) outlive every outstanding completion.
            let conn = Arc::clone(self);
            tokio::spawn(async move { conn.do_async_writes().await });
        }
    }

    /// Flush rounds until the queue is empty.
    ///
    /// Each round takes up to `async_write_max_messages` buffers off the
    /// head and issues a single gather-write for all of them; the round's
    /// status fans out to each buffer's completion, FIFO.
    async fn do_async_writes(self: Arc<Self>) {
        loop {
            let (batch, broken_pipe) = {
                let mut state = self.write_queue.lock().unwrap();
                let take = state
                    .queue
                    .len()
                    .min(self.config.async_write_max_messages.max(1));
                let batch: Vec<AsyncWriteBuffer> = state.queue.drain(..take).collect();
                (batch, state.broken_pipe)
            };

            let status = if broken_pipe {
                Err(FramepipeError::BrokenPipe)
            } else {
                let mut parts: Vec<&[u8]> = Vec::with_capacity(batch.len() * 2);
                for buffer in &batch {
                    parts.push(&buffer.header);
                    if !buffer.payload.is_empty() {
                        parts.push(&buffer.payload);
                    }
                }
                self.write_batch(&parts).await
            };

            if !broken_pipe {
                match &status {
                    Err(err) if err.is_broken_pipe() => {
                        error!("broken pipe while flushing async writes");
                        self.write_queue.lock().unwrap().broken_pipe = true;
                    }
                    Err(err) => {
                        error!(error = %err, "async write flush failed");
                    }
                    Ok(()) => {}
                }
            }

            for mut buffer in batch {
                if let Some(completion) = buffer.completion.take() {
                    completion(status.clone());
                }
            }

            let more = {
                let mut state = self.write_queue.lock().unwrap();
                if state.queue.is_empty() {
                    state.in_flight = false;
                    false
                } else {
                    true
                }
            };
            if !more {
                break;
            }
        }
    }

    async fn write_batch(&self, parts: &[&[u8]]) -> Result<()> {
        let _timer = self
            .stats
            .as_ref()
            .map(|s| s.record_start("server_connection.async_write.flush"));

        let mut writer = self.writer.lock().await;
        io_util::write_all_vectored(&mut *writer, parts).await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    ///
    /// Reads on the peer observe EOF; local writes after this fail and
    /// surface through the usual completion paths.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Total payload bytes observed by the read paths.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total payload bytes handed to the write paths.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Number of synchronous writes started.
    pub fn sync_writes(&self) -> u64 {
        self.sync_writes.load(Ordering::Relaxed)
    }

    /// Number of asynchronous writes enqueued.
    pub fn async_writes(&self) -> u64 {
        self.async_writes.load(Ordering::Relaxed)
    }

    /// Number of messages currently queued and not yet in a flush round.
    pub fn pending_async_writes(&self) -> usize {
        self.write_queue.lock().unwrap().queue.len()
    }

    /// Whether a flush round is outstanding.
    pub fn write_in_flight(&self) -> bool {
        self.write_queue.lock().unwrap().in_flight
    }

    /// Render the observable counters and queue state.
    pub fn debug_string(&self) -> String {
        let state = self.write_queue.lock().unwrap();
        let pending_bytes: u64 = state.queue.iter().map(|b| b.payload.len() as u64).sum();
        format!(
            "\n- bytes read: {}\n- bytes written: {}\n- num async writes: {}\n- num sync writes: {}\n- writing: {}\n- pending async bytes: {}",
            self.bytes_read.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.async_writes.load(Ordering::Relaxed),
            self.sync_writes.load(Ordering::Relaxed),
            state.in_flight,
            pending_bytes,
        )
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        // Messages still queued never reached the socket; tell their owners.
        let state = self.write_queue.get_mut().unwrap();
        for mut buffer in state.queue.drain(..) {
            if let Some(completion) = buffer.completion.take() {
                completion(Err(FramepipeError::ConnectionClosed));
            }
        }
    }
}
