//! Reorder engine counters.
//!
//! The engine updates a shared [`ReorderStats`] as it works. Every field is a
//! relaxed atomic so readers (the stats server, tests, the simulator) never
//! contend with the engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Frame and session counters.
#[derive(Debug)]
pub struct ReorderStats {
    start_time: Instant,
    /// Frames released in window order (immediate or drained).
    pub frames_in_order: AtomicUsize,
    /// Frames stored to wait for a hole.
    pub frames_buffered: AtomicUsize,
    /// Old frames delivered without reordering.
    pub frames_passed_through: AtomicUsize,
    /// Buffered frames flushed by a session stop.
    pub frames_flushed: AtomicUsize,
    /// Duplicate frames dropped.
    pub duplicates_dropped: AtomicUsize,
    /// Frames given up as lost by aging or window moves.
    pub holes_skipped: AtomicUsize,
    /// Window scrolls caused by frames beyond the window.
    pub window_scrolls: AtomicUsize,
    /// Aging timer expiries.
    pub aging_expiries: AtomicUsize,
    /// Teardown requests issued.
    pub teardown_requests: AtomicUsize,
    /// Sessions started or reset.
    pub sessions_started: AtomicUsize,
    /// Sessions stopped.
    pub sessions_stopped: AtomicUsize,
    /// Sessions currently active.
    pub sessions_active: AtomicUsize,
}

/// Plain copy of [`ReorderStats`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_in_order: usize,
    pub frames_buffered: usize,
    pub frames_passed_through: usize,
    pub frames_flushed: usize,
    pub duplicates_dropped: usize,
    pub holes_skipped: usize,
    pub window_scrolls: usize,
    pub aging_expiries: usize,
    pub teardown_requests: usize,
    pub sessions_started: usize,
    pub sessions_stopped: usize,
    pub sessions_active: usize,
}

impl ReorderStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_in_order: AtomicUsize::new(0),
            frames_buffered: AtomicUsize::new(0),
            frames_passed_through: AtomicUsize::new(0),
            frames_flushed: AtomicUsize::new(0),
            duplicates_dropped: AtomicUsize::new(0),
            holes_skipped: AtomicUsize::new(0),
            window_scrolls: AtomicUsize::new(0),
            aging_expiries: AtomicUsize::new(0),
            teardown_requests: AtomicUsize::new(0),
            sessions_started: AtomicUsize::new(0),
            sessions_stopped: AtomicUsize::new(0),
            sessions_active: AtomicUsize::new(0),
        }
    }

    /// Add `n` to a counter.
    pub(crate) fn add(counter: &AtomicUsize, n: usize) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in_order: self.frames_in_order.load(Ordering::Relaxed),
            frames_buffered: self.frames_buffered.load(Ordering::Relaxed),
            frames_passed_through: self.frames_passed_through.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            holes_skipped: self.holes_skipped.load(Ordering::Relaxed),
            window_scrolls: self.window_scrolls.load(Ordering::Relaxed),
            aging_expiries: self.aging_expiries.load(Ordering::Relaxed),
            teardown_requests: self.teardown_requests.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_stopped: self.sessions_stopped.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
        }
    }

    /// Serialize all counters to JSON.
    pub fn to_json(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"{{"uptime_secs":{},"frames":{{"in_order":{},"buffered":{},"passed_through":{},"flushed":{},"duplicates_dropped":{},"holes_skipped":{}}},"window":{{"scrolls":{},"aging_expiries":{}}},"sessions":{{"started":{},"stopped":{},"active":{},"teardown_requests":{}}}}}"#,
            self.uptime_secs(),
            s.frames_in_order,
            s.frames_buffered,
            s.frames_passed_through,
            s.frames_flushed,
            s.duplicates_dropped,
            s.holes_skipped,
            s.window_scrolls,
            s.aging_expiries,
            s.sessions_started,
            s.sessions_stopped,
            s.sessions_active,
            s.teardown_requests
        )
    }
}

impl Default for ReorderStats {
    fn default() -> Self {
        Self::new()
    }
}
