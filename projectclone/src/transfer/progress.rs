//! Progress tracking for copy operations.
//!
//! Progress is informational only: it is reported through tracing and never
//! affects what gets copied.

use std::time::{Duration, Instant};

/// Minimum time between two progress reports
const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Progress information for a copy operation
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Total bytes to transfer
    pub total_bytes: u64,

    /// Bytes transferred so far
    pub transferred_bytes: u64,

    /// Percentage complete (0-100)
    pub percent_complete: f64,

    /// Number of files processed
    pub files_processed: usize,

    /// Total number of files
    pub total_files: usize,
}

impl TransferProgress {
    /// Create a new progress record
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            percent_complete: 0.0,
            files_processed: 0,
            total_files,
        }
    }

    /// Account for one more finished file
    pub fn add_file(&mut self, bytes: u64) {
        self.files_processed += 1;
        self.transferred_bytes += bytes;
        self.percent_complete = if self.total_bytes > 0 {
            ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else if self.total_files > 0 {
            ((self.files_processed as f64 / self.total_files as f64) * 100.0).min(100.0)
        } else {
            100.0
        };
    }

    /// Check if transfer is complete
    pub fn is_complete(&self) -> bool {
        self.files_processed >= self.total_files
    }
}

/// Progress tracker with throttled reporting
pub struct ProgressTracker {
    start_time: Instant,
    last_report: Option<Instant>,
    progress: TransferProgress,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            last_report: None,
            progress: TransferProgress::new(total_bytes, total_files),
        }
    }

    /// Record a finished file and log progress if enough time has passed.
    pub fn file_done(&mut self, bytes: u64) {
        self.progress.add_file(bytes);

        let now = Instant::now();
        let due = self
            .last_report
            .map_or(true, |last| now.duration_since(last) >= REPORT_INTERVAL);
        if due || self.progress.is_complete() {
            self.last_report = Some(now);
            tracing::info!(
                files = self.progress.files_processed,
                total_files = self.progress.total_files,
                copied = %format_bytes(self.progress.transferred_bytes),
                speed = %format_speed(self.average_speed()),
                elapsed = %format_duration(self.elapsed().as_secs()),
                "Progress {:.1}%",
                self.progress.percent_complete
            );
        }
    }

    /// Get total elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// Get current progress
    pub fn progress(&self) -> &TransferProgress {
        &self.progress
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

    #[test]
    fn test_transfer_progress_new() {
        let progress = TransferProgress::new(1000, 10);
        assert_eq!(progress.total_bytes, 1000);
        assert_eq!(progress.transferred_bytes, 0);
        assert_eq!(progress.percent_complete, 0.0);
    }

    #[test]
    fn test_add_file() {
        let mut progress = TransferProgress::new(1000, 2);
        progress.add_file(500);
        assert_eq!(progress.percent_complete, 50.0);
        assert!(!progress.is_complete());
        progress.add_file(500);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_empty_files_use_file_count() {
        let mut progress = TransferProgress::new(0, 4);
        progress.add_file(0);
        assert_eq!(progress.percent_complete, 25.0);
    }

    #[test]
    fn test_tracker_counts_files() {
        let mut tracker = ProgressTracker::new(30, 3);
        tracker.file_done(10);
        tracker.file_done(10);
        assert_eq!(tracker.progress().files_processed, 2);
        assert_eq!(tracker.progress().transferred_bytes, 20);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3660), "1h 1m");
    }
}
