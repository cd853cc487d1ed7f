//! Opt-in per-operation statistics.
//!
//! When [`TransportConfig::event_stats`](crate::config::TransportConfig) is
//! set, connections record the start and stop of each asynchronous read and
//! write round into an [`EventStats`] sink. The numbers are observational
//! only; nothing in the transport consults them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Aggregate numbers for one operation label.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpSnapshot {
    /// How many times the operation was started.
    pub started: u64,
    /// How many times it ran to completion.
    pub finished: u64,
    /// Cumulative wall time of the finished runs.
    pub total: Duration,
}

/// Sink for operation start/stop events, keyed by a static label.
#[derive(Debug, Default)]
pub struct EventStats {
    ops: Mutex<HashMap<&'static str, OpSnapshot>>,
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of `op` and return a timer that records the stop
    /// (with its duration) when dropped.
    pub fn record_start(self: &Arc<Self>, op: &'static str) -> OpTimer {
        {
            let mut ops = self.ops.lock().unwrap();
            ops.entry(op).or_default().started += 1;
        }
        OpTimer {
            stats: Arc::clone(self),
            op,
            start: Instant::now(),
        }
    }

    fn record_stop(&self, op: &'static str, elapsed: Duration) {
        let mut ops = self.ops.lock().unwrap();
        let entry = ops.entry(op).or_default();
        entry.finished += 1;
        entry.total += elapsed;
    }

    /// Current numbers for every label, sorted by label.
    pub fn snapshot(&self) -> Vec<(&'static str, OpSnapshot)> {
        let ops = self.ops.lock().unwrap();
        let mut entries: Vec<_> = ops.iter().map(|(op, snap)| (*op, *snap)).collect();
        entries.sort_by_key(|(op, _)| *op);
        entries
    }

    /// Numbers for a single label, if it was ever recorded.
    pub fn get(&self, op: &str) -> Option<OpSnapshot> {
        self.ops.lock().unwrap().get(op).copied()
    }

    /// Human-readable rendering of the sink.
    pub fn debug_string(&self) -> String {
        let mut result = String::new();
        for (op, snap) in self.snapshot() {
            result.push_str(&format!(
                "\n- {}: started {}, finished {}, total {} ms",
                op,
                snap.started,
                snap.finished,
                snap.total.as_millis()
            ));
        }
        result
    }
}

/// Guard returned by [`EventStats::record_start`]; records the stop on drop.
pub struct OpTimer {
    stats: Arc<EventStats>,
    op: &'static str,
    start: Instant,
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        self.stats.record_stop(self.op, self.start.elapsed());
    }
}
