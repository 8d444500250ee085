//! Heart rate smoothing
//!
//! Rejects out-of-range values and optionally averages the remaining ones
//! over a fixed-size moving window.

use std::collections::VecDeque;

/// Inclusive validity range for beats per minute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateBounds {
    pub min: u16,
    pub max: u16,
}

impl HeartRateBounds {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, bpm: u16) -> bool {
        (self.min..=self.max).contains(&bpm)
    }
}

impl Default for HeartRateBounds {
    fn default() -> Self {
        Self { min: 40, max: 200 }
    }
}

/// Output of the filter for one accepted sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    /// Mean of the window (or the raw value when smoothing is off)
    pub mean: f32,
}

impl RateEstimate {
    /// Value for integer-typed parameters, truncated toward zero
    pub fn whole(&self) -> i32 {
        self.mean as i32
    }
}

/// Moving-average filter over the last `capacity` accepted values
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    bounds: HeartRateBounds,
    enabled: bool,
    capacity: usize,
    window: VecDeque<u16>,
}

impl SmoothingFilter {
    pub fn new(bounds: HeartRateBounds, enabled: bool, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bounds,
            enabled,
            capacity,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Feed a raw value
    ///
    /// Returns `None` when the value is outside the bounds. A rejected value
    /// never enters the window and never evicts an existing slot.
    pub fn push(&mut self, bpm: u16) -> Option<RateEstimate> {
        if !self.bounds.contains(bpm) {
            return None;
        }

        if !self.enabled {
            return Some(RateEstimate {
                mean: f32::from(bpm),
            });
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(bpm);

        let sum: u32 = self.window.iter().map(|v| u32::from(*v)).sum();
        Some(RateEstimate {
            mean: sum as f32 / self.window.len() as f32,
        })
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
