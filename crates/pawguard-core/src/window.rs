//! Fixed-capacity sliding window of RSSI samples.
//!
//! Each tracked beacon owns one window. Samples are appended at the tail and
//! the oldest sample falls off the head once the window is full, so the
//! average always reflects the most recent `capacity` readings.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Bounded FIFO of RSSI samples with moving-average statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalWindow {
    samples: VecDeque<i16>,
    capacity: NonZeroUsize,
}

impl SignalWindow {
    /// Create an empty window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one if the window is full.
    pub fn push(&mut self, sample: i16) {
        if self.samples.len() == self.capacity.get() {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Remove the oldest sample. Does nothing on an empty window.
    pub fn evict_oldest(&mut self) -> Option<i16> {
        self.samples.pop_front()
    }

    /// Arithmetic mean of the window, or `None` when empty.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|&s| i64::from(s)).sum();
        #[allow(clippy::cast_precision_loss)]
        Some(sum as f64 / self.samples.len() as f64)
    }

    /// Bessel-corrected sample standard deviation, or `None` with fewer than
    /// two samples.
    #[must_use]
    pub fn stdev(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.average()?;
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let d = f64::from(s) - mean;
                d * d
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let variance = sum_sq / (self.samples.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples this window retains.
    #[must_use]
    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = i16> + '_ {
        self.samples.iter().copied()
    }
}
