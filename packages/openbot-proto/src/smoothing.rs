//! Integer moving averages.

use alloc::collections::VecDeque;
use core::num::NonZeroUsize;

use crate::message::TargetReport;

/// Sliding-window mean over the last `capacity` integer samples.
///
/// The running sum is kept alongside the window so every push is O(1). The
/// mean is taken over however many samples are buffered, so the first few
/// outputs are not diluted by empty slots.
///
/// # Invariants
///
/// - `sum` always equals the total of the samples in the window.
/// - The window never holds more than `capacity` samples; the oldest is
///   evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovingAverage {
    window: VecDeque<i32>,
    capacity: NonZeroUsize,
    sum: i64,
}

impl MovingAverage {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.get()),
            capacity,
            sum: 0,
        }
    }

    /// Adds a sample and returns the updated mean.
    pub fn push(&mut self, value: i32) -> i32 {
        if self.window.len() == self.capacity.get() {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= i64::from(oldest);
            }
        }

        self.window.push_back(value);
        self.sum += i64::from(value);

        self.mean().unwrap_or(value)
    }

    /// Floor of the mean of the buffered samples, or `None` when empty.
    pub fn mean(&self) -> Option<i32> {
        let len = i64::try_from(self.window.len()).ok().filter(|len| *len > 0)?;

        // The floor of a mean of i32 samples always fits in an i32.
        Some(self.sum.div_euclid(len) as i32)
    }

    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub const fn sum(&self) -> i64 {
        self.sum
    }

    /// Buffered samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = i32> + '_ {
        self.window.iter().copied()
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.sum = 0;
    }
}

/// One [`MovingAverage`] per [`TargetReport`] field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSmoother {
    fields: [MovingAverage; TargetReport::FIELD_COUNT],
}

impl TargetSmoother {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            fields: core::array::from_fn(|_| MovingAverage::new(capacity)),
        }
    }

    /// Pushes every field of `report` into its window, in wire order, and
    /// returns the smoothed report.
    pub fn smooth(&mut self, report: TargetReport) -> TargetReport {
        let raw = report.fields();
        let mut smoothed = [0; TargetReport::FIELD_COUNT];

        for ((window, value), out) in self.fields.iter_mut().zip(raw).zip(&mut smoothed) {
            *out = window.push(value);
        }

        TargetReport::from_fields(smoothed)
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.fields[0].capacity()
    }

    pub fn clear(&mut self) {
        self.fields.iter_mut().for_each(MovingAverage::clear);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::num::NonZeroUsize;

    use super::{MovingAverage, TargetSmoother};
    use crate::TargetReport;

    fn window(capacity: usize) -> MovingAverage {
        MovingAverage::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn identical_samples_average_to_themselves() {
        let mut avg = window(4);
        let outputs: Vec<_> = (0..4).map(|_| avg.push(37)).collect();

        assert_eq!(outputs, [37, 37, 37, 37]);
    }

    #[test]
    fn warm_up_divides_by_buffered_count() {
        let mut avg = window(5);

        assert_eq!(avg.push(10), 10);
        assert_eq!(avg.push(20), 15);
        assert_eq!(avg.push(40), 23);
        assert_eq!(avg.len(), 3);
    }

    #[test]
    fn eviction_keeps_exact_sum() {
        let mut avg = window(3);
        for v in [1, 2, 3, 4] {
            avg.push(v);
        }

        assert_eq!(avg.samples().collect::<Vec<_>>(), [2, 3, 4]);
        assert_eq!(avg.sum(), 9);
        assert_eq!(avg.mean(), Some(3));

        for v in [1_000_000, -1_000_000, 7, 7, 7] {
            avg.push(v);
        }
        assert_eq!(avg.sum(), 21);
    }

    #[test]
    fn mean_floors_negative_values() {
        let mut avg = window(2);
        avg.push(-1);

        assert_eq!(avg.push(-2), -2);
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let mut avg = window(2);
        avg.push(i32::MAX);

        assert_eq!(avg.push(i32::MAX), i32::MAX);
        assert_eq!(avg.push(i32::MIN), -1);
    }

    #[test]
    fn empty_window_has_no_mean() {
        let mut avg = window(2);
        assert_eq!(avg.mean(), None);

        avg.push(5);
        avg.clear();
        assert!(avg.is_empty());
        assert_eq!(avg.sum(), 0);
    }

    #[test]
    fn smoother_averages_each_field() {
        let mut smoother = TargetSmoother::new(NonZeroUsize::new(2).unwrap());

        smoother.smooth(TargetReport::from_fields([1, 1, 1, 1, 640, 480]));
        let smoothed = smoother.smooth(TargetReport::from_fields([3, 3, 3, 3, 640, 480]));

        assert_eq!(smoothed.fields(), [2, 2, 2, 2, 640, 480]);
    }
}
