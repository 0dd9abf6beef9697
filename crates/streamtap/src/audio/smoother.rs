//! Moving-average smoother
//!
//! Fixed-length temporal low-pass filter over a scalar signal. The analyzer
//! keeps one per frequency bin to take the jitter out of successive windows.

use crate::error::{Result, TapError};

/// Ring-buffer moving average with O(1) updates.
///
/// The running sum is kept in `f64` and recomputed from the ring every time
/// the write position wraps, so rounding error cannot build up over a long
/// stream.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    ring: Vec<f32>,
    head: usize,
    count: usize,
    sum: f64,
}

impl MovingAverage {
    /// Create a smoother averaging over the last `length` values
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(TapError::InvalidArgument(
                "smoothing window length must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            ring: vec![0.0; length],
            head: 0,
            count: 0,
            sum: 0.0,
        })
    }

    /// Window length fixed at construction
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Number of values currently contributing to the average
    pub fn count(&self) -> usize {
        self.count
    }

    /// True until the first `update`
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one value, evicting the oldest once the window is full
    pub fn update(&mut self, value: f32) {
        let evicted = if self.count == self.ring.len() {
            self.ring[self.head]
        } else {
            self.count += 1;
            0.0
        };
        self.ring[self.head] = value;
        self.sum += value as f64 - evicted as f64;

        self.head += 1;
        if self.head == self.ring.len() {
            self.head = 0;
            self.sum = self.ring[..self.count].iter().map(|&v| v as f64).sum();
        }
    }

    /// Mean of the last `min(count, len)` values, `None` before any update
    pub fn average(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        Some((self.sum / self.count as f64) as f32)
    }

    /// Forget all values, keeping the window length
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|v| *v = 0.0);
        self.head = 0;
        self.count = 0;
        self.sum = 0.0;
    }
}
