//! Timestamps for local writes.

use std::sync::atomic::{AtomicI64, Ordering};

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Source of local write timestamps (Unix ms).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock that never goes backwards and never repeats a value.
///
/// `_localModifiedDate` doubles as the version compared against the server's
/// `modifiedDate`, so two local writes must never share a timestamp.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> i64 {
        let now = unix_millis_now();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

/// Manually driven clock, for deterministic replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub const fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, value: i64) {
        self.now.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) -> i64 {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
