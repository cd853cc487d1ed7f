//! Transport configuration.
//!
//! A [`TransportConfig`] is handed to every connection factory; there is no
//! process-wide singleton. Clone it freely, it is plain data.

/// Cookie embedded in every outgoing frame unless the host overrides it.
///
/// The value spells `FRAMEPIP` in ASCII. Both peers must agree on the
/// cookie; it guards against accidental cross-version or cross-process
/// framing collisions, nothing more.
pub const DEFAULT_COOKIE: i64 = 0x4652_414D_4550_4950;

/// Default number of connect attempts when the caller passes a negative
/// retry count to [`connect_with_retry`](crate::transport::connect_with_retry).
pub const DEFAULT_CONNECT_NUM_ATTEMPTS: u32 = 10;

/// Default per-attempt sleep in milliseconds for connect retries.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

/// Default threshold above which slow message handlers are logged.
pub const DEFAULT_HANDLER_WARNING_TIMEOUT_MS: u64 = 1000;

/// Default cap on inbound payload length (1 GiB).
pub const DEFAULT_MAX_READ_LENGTH: i64 = 1_073_741_824;

/// Configuration injected at connection construction.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Value embedded in every outgoing frame and required on every
    /// incoming frame.
    pub cookie: i64,
    /// Default attempt count when a caller passes `num_retries < 0`.
    pub connect_num_attempts: u32,
    /// Default per-attempt sleep when a caller passes `timeout_ms < 0`.
    pub connect_timeout_ms: u64,
    /// Message handlers running longer than this are logged with a warning.
    pub handler_warning_timeout_ms: u64,
    /// How many queued messages are coalesced into one gather-write.
    /// Must be positive; 1 gives strict per-message completion semantics.
    pub async_write_max_messages: usize,
    /// Upper bound on the payload length accepted from a peer. Frames
    /// declaring more fail before any allocation.
    pub max_read_length: i64,
    /// When set, async read/write operations record start/stop into an
    /// [`EventStats`](crate::stats::EventStats) sink. Observable only.
    pub event_stats: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            cookie: DEFAULT_COOKIE,
            connect_num_attempts: DEFAULT_CONNECT_NUM_ATTEMPTS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handler_warning_timeout_ms: DEFAULT_HANDLER_WARNING_TIMEOUT_MS,
            async_write_max_messages: 1,
            max_read_length: DEFAULT_MAX_READ_LENGTH,
            event_stats: false,
        }
    }
}
