//! Platform-specific local stream implementation.
//!
//! - Unix: Unix domain socket
//! - Windows: named pipe
//!
//! Endpoints are plain paths (`/tmp/worker.sock`, `\\.\pipe\worker`); there
//! is no URL layer. On POSIX every socket and listener is close-on-exec
//! from the moment it exists: std opens sockets with `SOCK_CLOEXEC`.
//!
//! # Example
//!
//! ```ignore
//! use framepipe::transport::{generate_socket_path, LocalListener};
//!
//! let path = generate_socket_path();
//! let listener = LocalListener::bind(&path).await?;
//! let stream = listener.accept().await?;
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

/// Generate a unique endpoint path for this process.
///
/// Format:
/// - Unix: `/tmp/framepipe-{pid}-{random}.sock`
/// - Windows: `\\.\pipe\framepipe-{pid}-{random}`
pub fn generate_socket_path() -> String {
    let pid = std::process::id();
    let rand: u64 = rand_u64();

    #[cfg(unix)]
    {
        format!("/tmp/framepipe-{}-{:x}.sock", pid, rand)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\framepipe-{}-{:x}", pid, rand)
    }
}

/// Simple random u64 using system time and process ID.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::path::Path;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{UnixListener, UnixStream};

    /// Unix domain socket listener.
    pub struct LocalListener {
        listener: UnixListener,
        path: String,
    }

    /// Connected Unix domain socket stream.
    pub struct LocalStream {
        stream: UnixStream,
    }

    /// Read half of a [`LocalStream`].
    pub struct LocalReadHalf {
        half: OwnedReadHalf,
    }

    /// Write half of a [`LocalStream`].
    pub struct LocalWriteHalf {
        half: OwnedWriteHalf,
    }

    impl LocalListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub async fn bind(path: &str) -> std::io::Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> std::io::Result<LocalStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(LocalStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for LocalListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl LocalStream {
        /// Connect to a listening Unix socket.
        pub async fn connect(path: &str) -> std::io::Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Create a connected pair of streams.
        pub fn pair() -> std::io::Result<(Self, Self)> {
            let (a, b) = UnixStream::pair()?;
            Ok((Self { stream: a }, Self { stream: b }))
        }

        /// The underlying file descriptor.
        pub fn raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }

        /// Split into owned read and write halves.
        pub fn into_split(self) -> (LocalReadHalf, LocalWriteHalf) {
            let (read, write) = self.stream.into_split();
            (LocalReadHalf { half: read }, LocalWriteHalf { half: write })
        }
    }

    impl AsyncRead for LocalStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for LocalStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_write_vectored(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            bufs: &[std::io::IoSlice<'_>],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
        }

        fn is_write_vectored(&self) -> bool {
            self.stream.is_write_vectored()
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }

    impl AsyncRead for LocalReadHalf {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for LocalWriteHalf {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.half).poll_write(cx, buf)
        }

        fn poll_write_vectored(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            bufs: &[std::io::IoSlice<'_>],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.half).poll_write_vectored(cx, bufs)
        }

        fn is_write_vectored(&self) -> bool {
            self.half.is_write_vectored()
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    enum Pipe {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Windows named pipe listener.
    pub struct LocalListener {
        path: String,
    }

    /// Connected Windows named pipe stream.
    pub struct LocalStream {
        pipe: Pipe,
    }

    /// Read half of a [`LocalStream`].
    pub struct LocalReadHalf {
        half: tokio::io::ReadHalf<LocalStream>,
    }

    /// Write half of a [`LocalStream`].
    pub struct LocalWriteHalf {
        half: tokio::io::WriteHalf<LocalStream>,
    }

    impl LocalListener {
        /// Create a named pipe server.
        pub async fn bind(path: &str) -> std::io::Result<Self> {
            // The pipe is created on first accept; verify the name works.
            let _ = ServerOptions::new().first_pipe_instance(true).create(path)?;

            Ok(Self {
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> std::io::Result<LocalStream> {
            let server = ServerOptions::new()
                .first_pipe_instance(false)
                .create(&self.path)?;

            server.connect().await?;

            Ok(LocalStream {
                pipe: Pipe::Server(server),
            })
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl LocalStream {
        /// Connect to a listening named pipe.
        pub async fn connect(path: &str) -> std::io::Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(Self {
                pipe: Pipe::Client(client),
            })
        }

        /// Split into read and write halves.
        pub fn into_split(self) -> (LocalReadHalf, LocalWriteHalf) {
            let (read, write) = tokio::io::split(self);
            (LocalReadHalf { half: read }, LocalWriteHalf { half: write })
        }
    }

    impl AsyncRead for LocalStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_read(cx, buf),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for LocalStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_write(cx, buf),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_flush(cx),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_shutdown(cx),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_shutdown(cx),
            }
        }
    }

    impl AsyncRead for LocalReadHalf {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for LocalWriteHalf {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.half).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.half).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{LocalListener, LocalReadHalf, LocalStream, LocalWriteHalf};

#[cfg(windows)]
pub use windows_impl::{LocalListener, LocalReadHalf, LocalStream, LocalWriteHalf};
