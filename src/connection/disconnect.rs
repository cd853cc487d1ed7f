//! Batched peer hang-up detection.

use std::sync::Arc;

use super::client::ClientConnection;

/// Report, for each connection, whether the kernel says the peer hung up.
///
/// One `poll(2)` syscall covers all of the descriptors, so sweeping a
/// daemon's whole connection table is O(1) syscalls regardless of N. On
/// Windows there is no equivalent and the sweep reports all-false.
pub fn check_for_client_disconnects(conns: &[Arc<ClientConnection>]) -> Vec<bool> {
    #[cfg(unix)]
    {
        unix_impl::poll_for_hup(conns)
    }

    #[cfg(windows)]
    {
        vec![false; conns.len()]
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tracing::warn;

    pub(super) fn poll_for_hup(conns: &[Arc<ClientConnection>]) -> Vec<bool> {
        if conns.is_empty() {
            return Vec::new();
        }

        // POLLHUP is reported in revents without being requested.
        let mut poll_fds: Vec<libc::pollfd> = conns
            .iter()
            .map(|conn| libc::pollfd {
                fd: conn.native_handle(),
                events: 0,
                revents: 0,
            })
            .collect();

        let ret = unsafe { libc::poll(poll_fds.as_mut_ptr(), poll_fds.len() as libc::nfds_t, 0) };

        if ret < 0 {
            warn!(
                error = %std::io::Error::last_os_error(),
                "failed to poll client connection fds"
            );
            return vec![false; conns.len()];
        }
        if ret == 0 {
            return vec![false; conns.len()];
        }

        poll_fds
            .iter()
            .map(|p| p.revents & libc::POLLHUP != 0)
            .collect()
    }
}
