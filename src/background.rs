//! Rolling estimate of the background noise level.

use crate::constants::detector::RING_BUFFER_SIZE;

/// Rolling mean of absolute amplitude over the last `RING_BUFFER_SIZE`
/// pushed samples.
///
/// The ring starts zero-filled, so the mean climbs from zero as real audio
/// arrives. The running sum is maintained incrementally with Kahan
/// compensation; the mean is never recomputed from scratch.
pub struct BackgroundLevel {
    samples: Vec<f32>,
    head: usize,
    sum: f64,
    compensation: f64,
}

impl BackgroundLevel {
    pub fn new() -> Self {
        Self {
            samples: vec![0.0; RING_BUFFER_SIZE],
            head: 0,
            sum: 0.0,
            compensation: 0.0,
        }
    }

    /// Replace the oldest entry with `value`, an absolute amplitude.
    pub fn push(&mut self, value: f32) {
        let evicted = self.samples[self.head];
        self.samples[self.head] = value;
        self.head += 1;
        if self.head >= RING_BUFFER_SIZE {
            self.head = 0;
        }
        self.add(value as f64 - evicted as f64);
    }

    /// Mean over the full ring capacity.
    pub fn mean(&self) -> f64 {
        self.sum / RING_BUFFER_SIZE as f64
    }

    fn add(&mut self, delta: f64) {
        let y = delta - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }
}

impl Default for BackgroundLevel {
    fn default() -> Self {
        Self::new()
    }
}
