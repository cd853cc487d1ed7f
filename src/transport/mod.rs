//! Transport module - local stream endpoints.
//!
//! One platform-neutral surface over Unix domain sockets (POSIX) and named
//! pipes (Windows), plus the bounded connect-retry loop client processes
//! use while the daemon's listener may not exist yet.

mod local;
mod retry;

pub use local::{generate_socket_path, LocalListener, LocalReadHalf, LocalStream, LocalWriteHalf};
pub use retry::connect_with_retry;
