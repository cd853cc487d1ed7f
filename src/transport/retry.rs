//! Bounded retry loop around local endpoint connect.

use std::time::Duration;

use tracing::info;

use crate::config::TransportConfig;
use crate::error::{FramepipeError, Result};
use crate::transport::LocalStream;

/// Connect to a local endpoint, retrying up to `num_retries` times with a
/// sleep of `timeout_ms` milliseconds after each failed attempt.
///
/// Negative `num_retries` or `timeout_ms` select the configured defaults.
/// The first failure is silent: the listening socket is created by the
/// daemon, and a benign startup race can put the client here before it
/// exists. Later failures are logged.
///
/// # Panics
///
/// Panics if `num_retries` is zero; asking for no attempts is a usage
/// error.
pub async fn connect_with_retry(
    path: &str,
    num_retries: i32,
    timeout_ms: i64,
    config: &TransportConfig,
) -> Result<LocalStream> {
    assert!(
        num_retries != 0,
        "connect_with_retry called with num_retries == 0"
    );
    let attempts = if num_retries < 0 {
        config.connect_num_attempts
    } else {
        num_retries as u32
    };
    let sleep_ms = if timeout_ms < 0 {
        config.connect_timeout_ms
    } else {
        timeout_ms as u64
    };

    let mut last_err = None;
    for attempt in 0..attempts {
        match LocalStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if attempt > 0 {
                    info!(
                        endpoint = path,
                        attempt,
                        attempts,
                        "retrying connect to local endpoint"
                    );
                }
                last_err = Some(err);
            }
        }
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
    }

    Err(last_err
        .map(FramepipeError::from)
        .unwrap_or_else(|| FramepipeError::Io("no connect attempts were made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[should_panic(expected = "num_retries == 0")]
    async fn zero_retries_is_a_usage_error() {
        let config = TransportConfig::default();
        let _ = connect_with_retry("/tmp/framepipe-nonexistent.sock", 0, 1, &config).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_endpoint_fails_after_all_attempts() {
        let config = TransportConfig::default();
        let start = std::time::Instant::now();
        let result =
            connect_with_retry("/tmp/framepipe-nonexistent.sock", 3, 5, &config).await;
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn negative_values_select_config_defaults() {
        let config = TransportConfig {
            connect_num_attempts: 2,
            connect_timeout_ms: 1,
            ..TransportConfig::default()
        };
        let start = std::time::Instant::now();
        let result =
            connect_with_retry("/tmp/framepipe-nonexistent.sock", -1, -1, &config).await;
        assert!(result.is_err());
        // Two attempts with a 1 ms sleep each.
        assert!(start.elapsed() >= Duration::from_millis(2));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connects_once_listener_exists() {
        use crate::transport::{generate_socket_path, LocalListener};

        let path = generate_socket_path();
        let listener = LocalListener::bind(&path).await.unwrap();
        let config = TransportConfig::default();

        let (stream, accepted) = tokio::join!(
            connect_with_retry(&path, 3, 10, &config),
            listener.accept()
        );
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }
}
