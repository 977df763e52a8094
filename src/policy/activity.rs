//! Activity trackers.

use super::ActivityTracker;
use chrono::{DateTime, Local};
use std::time::Instant;
use tracing::info;

/// Tracker that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActivity;

impl ActivityTracker for NoActivity {
    #[inline(always)]
    fn execute(&mut self, _receive_count: u64) {}
}

/// Logs a line every `interval` received messages.
#[derive(Debug)]
pub struct ActivityInfo {
    interval: u64,
    started: DateTime<Local>,
    last_report: Instant,
    reports: u64,
}

impl ActivityInfo {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            started: Local::now(),
            last_report: Instant::now(),
            reports: 0,
        }
    }

    /// Number of interval lines logged so far.
    pub fn reports(&self) -> u64 {
        self.reports
    }
}

impl ActivityTracker for ActivityInfo {
    #[inline]
    fn execute(&mut self, receive_count: u64) {
        if receive_count % self.interval != 0 {
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_report);
        self.last_report = now;
        self.reports += 1;

        let rate = if elapsed.as_secs_f64() > 0.0 {
            self.interval as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            time = %Local::now().format("%H:%M:%S%.3f"),
            received = receive_count,
            interval_ms = elapsed.as_millis() as u64,
            msg_per_sec = rate as u64,
            "Activity"
        );
    }

    fn report(&self) {
        info!(
            since = %self.started.format("%Y-%m-%d %H:%M:%S"),
            intervals = self.reports,
            every = self.interval,
            "Activity summary"
        );
    }
}
