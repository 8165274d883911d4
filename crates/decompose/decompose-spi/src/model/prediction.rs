//! Prediction output.

use serde::{Deserialize, Serialize};

/// Prediction with a symmetric confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl PredictInterval {
    pub fn point(mean: f64) -> Self {
        Self { mean, lower: mean, upper: mean }
    }

    pub fn new(mean: f64, lower: f64, upper: f64) -> Self {
        Self { mean, lower, upper }
    }

    /// Clamp `value` to the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }
}
