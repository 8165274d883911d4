//! Decayable moment accumulators.
//!
//! These are the basic statistics carried throughout the decomposition:
//! weighted running means and variances whose effective sample count can be
//! aged down by an exponential factor. Ageing multiplies the count only, so
//! the moments themselves are unchanged but respond faster to new data.

use serde::{Deserialize, Serialize};

/// Weighted running mean with a decayable count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanAccumulator {
    count: f64,
    mean: f64,
}

impl MeanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An accumulator holding a single weighted sample.
    pub fn with_sample(value: f64, weight: f64) -> Self {
        let mut result = Self::default();
        result.add(value, weight);
        result
    }

    /// Rebuild an accumulator from persisted moments.
    pub fn from_parts(count: f64, mean: f64) -> Self {
        Self { count, mean }
    }

    pub fn add(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.count += weight;
        self.mean += weight / self.count * (value - self.mean);
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }

    /// Age the effective sample count by `factor` in (0, 1].
    pub fn age(&mut self, factor: f64) {
        self.count *= factor;
    }

    /// Shift the mean in place, leaving the count untouched.
    pub fn shift(&mut self, delta: f64) {
        self.mean += delta;
    }

    /// Fold another accumulator's samples into this one.
    pub fn merge(&mut self, other: &MeanAccumulator) {
        if other.count > 0.0 {
            self.add(other.mean, other.count);
        }
    }

    /// Set the mean in place, leaving the count untouched.
    pub fn set_mean(&mut self, mean: f64) {
        self.mean = mean;
    }
}

/// Weighted running mean and variance with a decayable count.
///
/// The variance is the maximum-likelihood estimate (second central moment).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanVarAccumulator {
    count: f64,
    mean: f64,
    m2: f64,
}

impl MeanVarAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an accumulator from persisted moments. `m2` is the weighted
    /// sum of squared deviations, i.e. `variance * count`.
    pub fn from_parts(count: f64, mean: f64, m2: f64) -> Self {
        Self { count, mean, m2 }
    }

    /// The weighted sum of squared deviations from the mean.
    pub fn m2(&self) -> f64 {
        self.m2
    }

    pub fn add(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.count += weight;
        let delta = value - self.mean;
        self.mean += weight / self.count * delta;
        self.m2 += weight * delta * (value - self.mean);
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count > 0.0 {
            (self.m2 / self.count).max(0.0)
        } else {
            0.0
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn age(&mut self, factor: f64) {
        self.count *= factor;
        self.m2 *= factor;
    }

    /// Scale the sampled quantity: moments of `factor * x`.
    pub fn scale(&mut self, factor: f64) {
        self.mean *= factor;
        self.m2 *= factor * factor;
    }

    /// Fold another accumulator's samples into this one.
    pub fn merge(&mut self, other: &MeanVarAccumulator) {
        if other.count <= 0.0 {
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + other.count / count * delta;
        self.m2 += other.m2 + self.count * other.count / count * delta * delta;
        self.count = count;
        self.mean = mean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_accumulator() {
        let mut acc = MeanAccumulator::new();
        acc.add(2.0, 1.0);
        acc.add(4.0, 1.0);
        acc.add(6.0, 2.0);
        assert!((acc.mean() - 4.5).abs() < 1e-12);
        assert!((acc.count() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_accumulator_age_preserves_mean() {
        let mut acc = MeanAccumulator::with_sample(10.0, 4.0);
        acc.age(0.5);
        assert!((acc.mean() - 10.0).abs() < 1e-12);
        assert!((acc.count() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_var_accumulator() {
        let mut acc = MeanVarAccumulator::new();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.add(x, 1.0);
        }
        assert!((acc.mean() - 5.0).abs() < 1e-12);
        assert!((acc.variance() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_var_zero_weight_ignored() {
        let mut acc = MeanVarAccumulator::new();
        acc.add(100.0, 0.0);
        assert_eq!(acc.count(), 0.0);
        assert_eq!(acc.variance(), 0.0);
    }

    #[test]
    fn test_merge_matches_bulk_accumulation() {
        let samples = [2.0, 4.0, 4.0, 5.0, 7.0, 9.0];
        let mut bulk = MeanVarAccumulator::new();
        let mut left = MeanVarAccumulator::new();
        let mut right = MeanVarAccumulator::new();
        for (index, &x) in samples.iter().enumerate() {
            bulk.add(x, 1.0);
            if index < 3 {
                left.add(x, 1.0);
            } else {
                right.add(x, 1.0);
            }
        }
        left.merge(&right);
        assert!((left.mean() - bulk.mean()).abs() < 1e-12);
        assert!((left.variance() - bulk.variance()).abs() < 1e-12);
        assert!((left.count() - bulk.count()).abs() < 1e-12);
    }

    #[test]
    fn test_scale() {
        let mut acc = MeanVarAccumulator::new();
        for x in [1.0, 3.0] {
            acc.add(x, 1.0);
        }
        acc.scale(2.0);
        assert!((acc.mean() - 4.0).abs() < 1e-12);
        assert!((acc.variance() - 4.0).abs() < 1e-12);
    }
}
