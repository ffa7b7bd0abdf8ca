//! Byte-level progress tracking for archive transfers.
//!
//! Totals are estimates (the upload side sums uncompressed file sizes, the
//! download side uses the compressed object size), so percentages are
//! capped at 100.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// Progress information for one archive transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Estimated total bytes
    pub total_bytes: u64,

    /// Bytes transferred so far
    pub transferred_bytes: u64,

    /// Current transfer speed in bytes/second
    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds)
    pub eta_seconds: u64,

    /// Percentage complete (0-100)
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else {
            0.0
        };
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes),
        }
    }

    /// Update progress and calculate speed
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        if self.progress.bytes_per_second > 0 {
            let remaining_bytes = self.progress.total_bytes.saturating_sub(transferred_bytes);
            self.progress.eta_seconds = remaining_bytes / self.progress.bytes_per_second;
        }

        self.progress.update(transferred_bytes);
        self.last_update_time = now;
        self.last_bytes = transferred_bytes;

        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Logs the progress of a named transfer through `tracing`.
///
/// Cheap to clone; every clone feeds the same tracker.
#[derive(Clone)]
pub struct ProgressReporter {
    label: Arc<str>,
    enabled: bool,
    tracker: Arc<Mutex<ProgressTracker>>,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, total_bytes: u64, enabled: bool) -> Self {
        Self {
            label: Arc::from(label.into()),
            enabled,
            tracker: Arc::new(Mutex::new(ProgressTracker::new(total_bytes))),
        }
    }

    /// Record the running byte count and log it.
    pub fn report(&self, transferred_bytes: u64) {
        let mut tracker = self
            .tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let progress = tracker.update(transferred_bytes);
        if self.enabled {
            info!(
                "{}: {:.1}% ({} of ~{}, {}, eta {})",
                self.label,
                progress.percent_complete,
                format_bytes(progress.transferred_bytes),
                format_bytes(progress.total_bytes),
                format_speed(progress.bytes_per_second),
                format_duration(progress.eta_seconds),
            );
        }
    }

    /// Log the final line of a transfer.
    pub fn finish(&self) {
        let tracker = self
            .tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.enabled {
            info!(
                "{}: done, {} in {} (avg {})",
                self.label,
                format_bytes(tracker.progress().transferred_bytes),
                format_duration(tracker.elapsed().as_secs()),
                format_speed(tracker.average_speed()),
            );
        }
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .progress()
            .transferred_bytes
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_transfer_progress_update() {
        let mut progress = TransferProgress::new(1000);
        progress.update(500);
        assert_eq!(progress.transferred_bytes, 500);
        assert!((progress.percent_complete - 50.0).abs() < 0.01);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_percent_is_capped_for_estimates() {
        let mut progress = TransferProgress::new(100);
        progress.update(250);
        assert!(progress.is_complete());
        assert!((progress.percent_complete - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_tracker_speed() {
        let mut tracker = ProgressTracker::new(1000);
        assert_eq!(tracker.update(100).transferred_bytes, 100);

        thread::sleep(Duration::from_millis(100));
        let prog = tracker.update(500);
        assert_eq!(prog.transferred_bytes, 500);
        assert!(prog.bytes_per_second > 0);
    }

    #[test]
    fn test_reporter_clones_share_state() {
        let reporter = ProgressReporter::new("upload bk1", 10, false);
        let clone = reporter.clone();
        clone.report(7);
        assert_eq!(reporter.transferred_bytes(), 7);
        reporter.finish();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
