//! Interval-based progress logging shared by the worker threads

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// Counts processed items and logs a line each time the count crosses a multiple
/// of the interval
///
/// An interval of `0` disables the periodic lines; [`ProgressTracker::log_final`]
/// still reports the total.
///
/// # Examples
///
/// ```rust
/// use bqpipe::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Validated records").with_interval(100);
/// tracker.add(250); // logs 100 and 200
/// assert_eq!(tracker.count(), 250);
/// tracker.log_final(); // logs "Validated records 250 (complete)"
/// ```
#[derive(Debug)]
pub struct ProgressTracker {
    message: String,
    interval: u64,
    count: AtomicU64,
}
impl ProgressTracker {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            interval: crate::pipeline::DEFAULT_PROGRESS_INTERVAL,
            count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Adds to the count, logging once per interval boundary crossed
    ///
    /// Returns the number of boundaries crossed.
    pub fn add(&self, additional: u64) -> u64 {
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        if self.interval == 0 || additional == 0 {
            return 0;
        }
        let first = prev / self.interval + 1;
        let last = (prev + additional) / self.interval;
        for milestone in first..=last {
            info!("{} {}", self.message, milestone * self.interval);
        }
        last + 1 - first
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Logs the total unless the last periodic line already showed it
    pub fn log_final(&self) {
        let count = self.count();
        if count == 0 {
            return;
        }
        if self.interval == 0 || !count.is_multiple_of(self.interval) {
            info!("{} {} (complete)", self.message, count);
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_boundaries_crossed() {
        let tracker = ProgressTracker::new("Items").with_interval(100);
        assert_eq!(tracker.add(50), 0);
        assert_eq!(tracker.add(60), 1);
        assert_eq!(tracker.add(290), 3);
        assert_eq!(tracker.count(), 400);
        assert_eq!(tracker.add(0), 0);
    }

    #[test]
    fn test_disabled_interval_still_counts() {
        let tracker = ProgressTracker::new("Items").with_interval(0);
        assert_eq!(tracker.add(1_000), 0);
        assert_eq!(tracker.count(), 1_000);
        tracker.log_final();
    }

    #[test]
    fn test_concurrent_adds() {
        let tracker = Arc::new(ProgressTracker::new("Items").with_interval(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || (0..250).map(|_| tracker.add(1)).sum::<u64>())
            })
            .collect();
        let crossed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(tracker.count(), 1_000);
        assert_eq!(crossed, 100);
    }
}
