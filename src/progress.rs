//! Progress reporting and cooperative cancellation for in-flight saves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Point-in-time view of an operation's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub current_operation: String,
    pub is_complete: bool,
    pub is_cancelled: bool,
}

/// Shared progress state for one save or load.
///
/// The percentage is an `f64` bit-cast into an `AtomicU64` so observers on
/// other threads read it without a lock; only the operation label takes a
/// (tiny) mutex. Cancellation is cooperative: the pipeline checks the flag
/// at phase boundaries only, never mid-write.
#[derive(Debug, Default)]
pub struct SaveProgress {
    percentage_bits: AtomicU64,
    complete: AtomicBool,
    cancelled: AtomicBool,
    current_operation: Mutex<String>,
}

impl SaveProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets the percentage (clamped to 0..=100) and the operation label.
    pub fn update(&self, percentage: f64, operation: &str) {
        let clamped = percentage.clamp(0.0, 100.0);
        self.percentage_bits
            .store(clamped.to_bits(), Ordering::Release);
        if let Ok(mut op) = self.current_operation.lock() {
            op.clear();
            op.push_str(operation);
        }
    }

    pub fn percentage(&self) -> f64 {
        f64::from_bits(self.percentage_bits.load(Ordering::Acquire))
    }

    pub fn mark_complete(&self) {
        self.percentage_bits
            .store(100.0f64.to_bits(), Ordering::Release);
        self.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Requests cancellation. The operation stops at its next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let current_operation = self
            .current_operation
            .lock()
            .map(|op| op.clone())
            .unwrap_or_default();
        ProgressSnapshot {
            percentage: self.percentage(),
            current_operation,
            is_complete: self.is_complete(),
            is_cancelled: self.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        let p = SaveProgress::new();
        let snap = p.snapshot();
        assert_eq!(snap.percentage, 0.0);
        assert!(!snap.is_complete);
        assert!(!snap.is_cancelled);
        assert!(snap.current_operation.is_empty());
    }

    #[test]
    fn test_update_and_snapshot() {
        let p = SaveProgress::new();
        p.update(42.5, "compressing blocks");

        let snap = p.snapshot();
        assert_eq!(snap.percentage, 42.5);
        assert_eq!(snap.current_operation, "compressing blocks");
    }

    #[test]
    fn test_percentage_clamped() {
        let p = SaveProgress::new();
        p.update(150.0, "x");
        assert_eq!(p.percentage(), 100.0);
        p.update(-3.0, "x");
        assert_eq!(p.percentage(), 0.0);
    }

    #[test]
    fn test_complete_forces_hundred() {
        let p = SaveProgress::new();
        p.update(80.0, "writing");
        p.mark_complete();
        assert!(p.is_complete());
        assert_eq!(p.percentage(), 100.0);
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let p = SaveProgress::new();
        let p2 = Arc::clone(&p);
        thread::spawn(move || p2.cancel()).join().unwrap();
        assert!(p.is_cancelled());
    }
}
