//! Connection module - framed connections over an owned local stream.
//!
//! [`ServerConnection`] is the write side: synchronous framed transfers
//! plus the coalescing asynchronous write pipeline. [`ClientConnection`]
//! wraps one and adds the handler-driven read loop. The batched
//! [`check_for_client_disconnects`] sweep answers "which peers hung up"
//! for a whole connection table in one syscall.

mod client;
mod disconnect;
mod server;

pub use client::{ClientConnection, ConnectionErrorHandler, MessageHandler};
pub use disconnect::check_for_client_disconnects;
pub use server::{ServerConnection, WriteCompletion};
