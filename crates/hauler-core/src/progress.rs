//! Throughput and ETA over a rolling window of byte-count snapshots.
//!
//! The orchestrator samples cumulative bytes at most once per interval and
//! keeps the last N samples; the rate is the slope between the oldest and the
//! newest sample. With fewer than two samples it falls back to the overall
//! average since the batch started.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default number of snapshots kept.
pub const WINDOW_CAPACITY: usize = 10;
/// Default minimum spacing between snapshots.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One `(timestamp, cumulative bytes)` sample. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub at: Instant,
    pub cumulative_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    window: VecDeque<ProgressSnapshot>,
    capacity: usize,
    interval: Duration,
    last_sample: Instant,
}

impl ProgressTracker {
    pub fn new(started: Instant) -> Self {
        Self::with_window(started, WINDOW_CAPACITY, SAMPLE_INTERVAL)
    }

    pub fn with_window(started: Instant, capacity: usize, interval: Duration) -> Self {
        let capacity = capacity.max(2);
        Self {
            started,
            window: VecDeque::with_capacity(capacity),
            capacity,
            interval,
            last_sample: started,
        }
    }

    /// Record a sample if at least one interval has passed since the last one.
    /// Returns true when a snapshot was taken.
    pub fn record(&mut self, now: Instant, cumulative_bytes: u64) -> bool {
        if now.saturating_duration_since(self.last_sample) < self.interval {
            return false;
        }
        self.window.push_back(ProgressSnapshot {
            at: now,
            cumulative_bytes,
        });
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
        self.last_sample = now;
        true
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &ProgressSnapshot> {
        self.window.iter()
    }

    /// Moving-average throughput in bytes per second.
    pub fn throughput(&self, now: Instant, cumulative_bytes: u64) -> f64 {
        if let (Some(first), Some(last)) = (self.window.front(), self.window.back()) {
            if self.window.len() >= 2 {
                let dt = last.at.saturating_duration_since(first.at).as_secs_f64();
                let db = last.cumulative_bytes.saturating_sub(first.cumulative_bytes);
                return if dt > 0.0 { db as f64 / dt } else { 0.0 };
            }
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            cumulative_bytes as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Seconds remaining at `rate`; `None` when the rate is zero.
    pub fn eta(remaining_bytes: u64, rate: f64) -> Option<f64> {
        if remaining_bytes == 0 {
            return Some(0.0);
        }
        if rate <= 0.0 {
            return None;
        }
        Some(remaining_bytes as f64 / rate)
    }
}

/// Progress event payload for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// 0..=100 for this file; 0 while the total is unknown.
    pub file_percent: f64,
    pub file_bytes: u64,
    pub file_total: Option<u64>,
    pub cumulative_bytes: u64,
    pub cumulative_total: u64,
    pub bytes_per_sec: f64,
    pub eta_secs: Option<f64>,
}

impl TransferProgress {
    /// Batch-level percent of bytes; 0 when nothing is expected yet.
    pub fn batch_percent(&self) -> f64 {
        if self.cumulative_total == 0 {
            return 0.0;
        }
        (self.cumulative_bytes as f64 / self.cumulative_total as f64 * 100.0).min(100.0)
    }
}

/// `"1.50 MB/s"` at or above one MiB/s, otherwise `"512.00 KB/s"`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let mib = bytes_per_sec / 1024.0 / 1024.0;
    if mib >= 1.0 {
        format!("{mib:.2} MB/s")
    } else {
        format!("{:.2} KB/s", bytes_per_sec.max(0.0) / 1024.0)
    }
}

/// `"42s"`, `"3m 5s"` or `"2h 10m"`; `"--"` when unknown.
pub fn format_eta(secs: Option<f64>) -> String {
    let Some(secs) = secs.filter(|s| s.is_finite() && *s >= 0.0) else {
        return "--".to_string();
    };
    let total = secs.ceil() as u64;
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_overall_average() {
        let t0 = Instant::now();
        let tracker = ProgressTracker::new(t0);
        let rate = tracker.throughput(t0 + Duration::from_secs(4), 4000);
        assert!((rate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn samples_are_spaced_and_bounded() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new(t0);
        assert!(!tracker.record(t0 + Duration::from_millis(500), 10));
        for i in 1..=15u64 {
            assert!(tracker.record(t0 + Duration::from_secs(i), i * 100));
        }
        assert_eq!(tracker.snapshots().count(), WINDOW_CAPACITY);
        let oldest = tracker.snapshots().next().unwrap();
        assert_eq!(oldest.cumulative_bytes, 600);
    }

    #[test]
    fn moving_average_uses_window_slope() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::new(t0);
        // Slow start, then a steady 2000 B/s.
        tracker.record(t0 + Duration::from_secs(1), 100);
        tracker.record(t0 + Duration::from_secs(2), 2100);
        tracker.record(t0 + Duration::from_secs(3), 4100);
        let rate = tracker.throughput(t0 + Duration::from_secs(3), 4100);
        assert!((rate - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn eta_edge_cases() {
        assert_eq!(ProgressTracker::eta(0, 0.0), Some(0.0));
        assert_eq!(ProgressTracker::eta(100, 0.0), None);
        assert_eq!(ProgressTracker::eta(100, 50.0), Some(2.0));
    }

    #[test]
    fn rate_strings() {
        assert_eq!(format_rate(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
        assert_eq!(format_rate(512.0 * 1024.0), "512.00 KB/s");
        assert_eq!(format_rate(0.0), "0.00 KB/s");
    }

    #[test]
    fn eta_strings() {
        assert_eq!(format_eta(Some(41.2)), "42s");
        assert_eq!(format_eta(Some(185.0)), "3m 5s");
        assert_eq!(format_eta(Some(7800.0)), "2h 10m");
        assert_eq!(format_eta(None), "--");
    }

    #[test]
    fn batch_percent_handles_zero_total() {
        let p = TransferProgress {
            file_percent: 0.0,
            file_bytes: 0,
            file_total: None,
            cumulative_bytes: 10,
            cumulative_total: 0,
            bytes_per_sec: 0.0,
            eta_secs: None,
        };
        assert_eq!(p.batch_percent(), 0.0);
    }
}
