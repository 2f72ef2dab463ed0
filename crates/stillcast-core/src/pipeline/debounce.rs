//! Per-path event debouncing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Drops repeated events for the same path that arrive within the window.
///
/// Owned by the watcher loop; entries older than `retention` are swept at
/// most once per window so the table stays bounded by recent activity.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    retention: Duration,
    last_accepted: HashMap<PathBuf, Instant>,
    last_sweep: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer. `eviction_factor` is clamped to at least 2 so an
    /// entry is never evicted while it can still suppress an event.
    pub fn new(window: Duration, eviction_factor: u32) -> Self {
        Self {
            window,
            retention: window * eviction_factor.max(2),
            last_accepted: HashMap::new(),
            last_sweep: None,
        }
    }

    /// Record an event for `path` at `now`; returns false if it should be dropped.
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        self.sweep(now);

        if let Some(last) = self.last_accepted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(path.to_path_buf(), now);
        true
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    fn sweep(&mut self, now: Instant) {
        if let Some(last) = self.last_sweep {
            if now.saturating_duration_since(last) < self.window {
                return;
            }
        }
        self.last_sweep = Some(now);

        let retention = self.retention;
        self.last_accepted
            .retain(|_, seen| now.saturating_duration_since(*seen) < retention);
    }
}
