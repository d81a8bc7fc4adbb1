//! The latest decoded target, shared between the decode path and readers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use openbot_proto::{TargetBox, TargetReport};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every guarded value here is replaced wholesale, so a poisoned lock never
/// exposes a half-written record.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Most recently decoded target.
///
/// # Invariants
///
/// - `available` is true only when `report` holds a fully decoded message.
/// - A rejected message clears `available` but keeps `report` and
///   `last_update_ms` from the last good message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatestTarget {
    pub report: TargetReport,
    pub available: bool,
    /// Clock reading when `report` was decoded.
    pub last_update_ms: u64,
}

impl LatestTarget {
    pub fn target(&self) -> Option<TargetReport> {
        self.available.then_some(self.report)
    }

    pub fn bounding_box(&self) -> Option<TargetBox> {
        self.target().map(|report| report.bounding_box())
    }

    /// Milliseconds since the target was decoded, or `None` if there is none.
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.available
            .then(|| now_ms.saturating_sub(self.last_update_ms))
    }
}

/// Cloneable handle to the single [`LatestTarget`] record.
///
/// Writers swap in a complete record under a short lock, so readers on other
/// threads always see either the old target or the new one.
#[derive(Debug, Clone, Default)]
pub struct SharedTarget(Arc<Mutex<LatestTarget>>);

impl SharedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LatestTarget {
        *lock(&self.0)
    }

    /// Records a freshly decoded target.
    pub fn publish(&self, report: TargetReport, now_ms: u64) {
        *lock(&self.0) = LatestTarget {
            report,
            available: true,
            last_update_ms: now_ms,
        };
    }

    /// Marks the current target unavailable without touching its fields.
    pub fn invalidate(&self) {
        let mut latest = lock(&self.0);
        *latest = LatestTarget {
            available: false,
            ..*latest
        };
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use openbot_proto::TargetReport;

    use super::SharedTarget;

    #[test]
    fn invalidate_keeps_fields() {
        let shared = SharedTarget::new();
        let report = TargetReport::from_fields([1, 2, 3, 4, 5, 6]);
        shared.publish(report, 40);
        shared.invalidate();

        let latest = shared.snapshot();
        assert!(!latest.available);
        assert_eq!(latest.report, report);
        assert_eq!(latest.last_update_ms, 40);
        assert_eq!(latest.target(), None);
        assert_eq!(latest.age_ms(100), None);
    }

    #[test]
    fn age_is_relative_to_last_update() {
        let shared = SharedTarget::new();
        shared.publish(TargetReport::default(), 40);

        assert_eq!(shared.snapshot().age_ms(55), Some(15));
        assert_eq!(shared.snapshot().age_ms(10), Some(0));
    }

    #[test]
    fn readers_never_see_mixed_records() {
        let shared = SharedTarget::new();
        let writer = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    shared.publish(TargetReport::from_fields([i; 6]), i as u64);
                }
            })
        };

        for _ in 0..2_000 {
            let fields = shared.snapshot().report.fields();
            assert!(fields.iter().all(|f| *f == fields[0]));
        }
        writer.join().unwrap();
    }
}
