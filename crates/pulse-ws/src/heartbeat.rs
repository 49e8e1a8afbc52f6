//! Heartbeat scheduling for the streaming client.
//!
//! Heartbeats are advisory: a tick whose send is blocked by the health
//! gate is skipped, never buffered.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Heartbeat schedule and counters.
pub struct Heartbeat {
    interval_ms: u64,
    sent: AtomicU64,
    suppressed: AtomicU64,
    last_sent_ms: AtomicI64,
}

impl Heartbeat {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            sent: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            last_sent_ms: AtomicI64::new(0),
        }
    }

    /// Interval for the event loop. The first tick fires one full period
    /// after connection, not immediately.
    pub fn ticker(&self) -> Interval {
        let period = Duration::from_millis(self.interval_ms);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.last_sent_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            last_sent_ms: self.last_sent_ms.load(Ordering::Relaxed),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatStats {
    pub sent: u64,
    pub suppressed: u64,
    pub last_sent_ms: i64,
}
