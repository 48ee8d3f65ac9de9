//! Run progress

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::task::TaskStatus;

/// Highest value a run that has not succeeded may report
pub const MAX_UNFINISHED: u8 = 99;

/// Progress band `[start, end]` covered by a phase
pub fn band(status: TaskStatus) -> (u8, u8) {
    match status {
        TaskStatus::Idle => (0, 0),
        TaskStatus::Downloading => (5, 30),
        TaskStatus::Uploading => (30, 55),
        TaskStatus::Syncing => (55, 75),
        TaskStatus::Executing => (75, MAX_UNFINISHED),
        TaskStatus::Success => (100, 100),
        TaskStatus::Failed => (0, MAX_UNFINISHED),
    }
}

/// Point inside a phase's band after `done` of `total` units of work
pub fn within(status: TaskStatus, done: usize, total: usize) -> u8 {
    let (start, end) = band(status);
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    start + (span * done.min(total) / total) as u8
}

/// Monotonic progress value. Only a successful run reaches 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    value: u8,
}

impl ProgressTracker {
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Raise progress to `target` (capped below 100); returns the new value
    /// when it changed
    pub fn advance(&mut self, target: u8) -> Option<u8> {
        let target = target.min(MAX_UNFINISHED);
        if target > self.value {
            self.value = target;
            Some(target)
        } else {
            None
        }
    }

    pub fn complete(&mut self) -> u8 {
        self.value = 100;
        self.value
    }
}

/// Shared count of finished work units within one phase
#[derive(Debug)]
pub struct PhaseCounter {
    phase: TaskStatus,
    total: usize,
    done: AtomicUsize,
}

impl PhaseCounter {
    pub fn new(phase: TaskStatus, total: usize) -> Self {
        Self {
            phase,
            total,
            done: AtomicUsize::new(0),
        }
    }

    /// Record one finished unit; returns the progress it corresponds to
    pub fn tick(&self) -> u8 {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        within(self.phase, done, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_band() {
        assert_eq!(within(TaskStatus::Syncing, 0, 4), 55);
        assert_eq!(within(TaskStatus::Syncing, 2, 4), 65);
        assert_eq!(within(TaskStatus::Syncing, 4, 4), 75);
        assert_eq!(within(TaskStatus::Executing, 0, 0), MAX_UNFINISHED);
    }

    #[test]
    fn test_phase_counter() {
        let counter = PhaseCounter::new(TaskStatus::Executing, 3);
        assert_eq!(counter.tick(), 83);
        assert_eq!(counter.tick(), 91);
        assert_eq!(counter.tick(), MAX_UNFINISHED);
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.advance(30), Some(30));
        assert_eq!(tracker.advance(10), None);
        assert_eq!(tracker.value(), 30);
        assert_eq!(tracker.advance(100), Some(MAX_UNFINISHED));
        assert_eq!(tracker.complete(), 100);
    }
}
