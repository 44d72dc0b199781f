use std::collections::VecDeque;

use super::DistanceReading;

/// How many recent distances are kept.
pub const HISTORY_LEN: usize = 10;

/// Stand-in for "too far" when there is no history yet, in centimeters.
pub const DEFAULT_FAR_DISTANCE_CM: f32 = 300.0;

/// A rolling window of the last [HISTORY_LEN] distances.
///
/// Used to estimate the true distance when the sensor reports a sentinel.
#[derive(Debug, Clone, Default)]
pub struct DistanceHistory {
    samples: VecDeque<f32>,
}

impl DistanceHistory {
    pub fn new() -> Self {
        DistanceHistory {
            samples: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    /// Appends a distance, dropping the oldest once full.
    pub fn push(&mut self, distance_cm: f32) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(distance_cm);
    }

    pub fn mean(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }

    /// Turns a reading into a usable distance.
    ///
    /// Measured values pass through. "Too far" becomes the history mean,
    /// or [DEFAULT_FAR_DISTANCE_CM] with no history. "Too close" becomes the
    /// history mean, or zero with no history.
    pub fn resolve(&self, reading: DistanceReading) -> f32 {
        match reading {
            DistanceReading::Measured(d) => d,
            DistanceReading::TooFar => self.mean().unwrap_or(DEFAULT_FAR_DISTANCE_CM),
            DistanceReading::TooClose => self.mean().unwrap_or(0.0),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
