//! Per-component prediction error tracking.
//!
//! Each seasonal and calendar component carries the statistics needed to
//! decide whether it still earns its keep: mean squared errors with no
//! components, with this component, and without this component, plus the
//! largest share of prediction variance ever attributed to it.

use decompose_spi::{DocumentReader, DocumentWriter, TimePoint, WEEK};

use crate::checksum::Checksummer;

/// Winsorization cap as a multiple of the running mean errors.
const WINSORIZATION_FACTOR: f64 = 36.0;
/// Samples required before winsorization kicks in.
const MINIMUM_COUNT_TO_WINSORIZE: f64 = 10.0;
/// A component whose peak variance share never exceeded this is inert.
const MINIMUM_VARIANCE_INCREASE_TO_KEEP: f64 = 1.2;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentErrors {
    count: f64,
    /// Means of (no-component error^2, with-component error^2,
    /// without-this-component error^2).
    mean_errors: [f64; 3],
    max_variance_increase: f64,
    has_variance_increase: bool,
}

impl ComponentErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        reference_error: f64,
        error: f64,
        prediction: f64,
        variance_increase: f64,
        weight: f64,
    ) {
        if weight <= 0.0 {
            return;
        }
        let mut squares = [
            reference_error * reference_error,
            error * error,
            (error + prediction) * (error + prediction),
        ];
        if self.count > MINIMUM_COUNT_TO_WINSORIZE {
            for (square, mean) in squares.iter_mut().zip(self.mean_errors) {
                *square = square.min(WINSORIZATION_FACTOR * mean);
            }
        }
        self.count += weight;
        for (mean, square) in self.mean_errors.iter_mut().zip(squares) {
            *mean += weight / self.count * (square - *mean);
        }
        if self.has_variance_increase {
            self.max_variance_increase = self.max_variance_increase.max(variance_increase);
        } else {
            self.max_variance_increase = variance_increase;
            self.has_variance_increase = true;
        }
    }

    /// True when the error history says the component should be pruned.
    pub fn remove(&self, bucket_length: TimePoint, period: TimePoint) -> bool {
        let history = self.count * bucket_length as f64;
        let error_with_no_components = self.mean_errors[0];
        let error_with_component = self.mean_errors[1];
        let error_without_component = self.mean_errors[2];
        (history > WEEK as f64 && error_with_component > error_with_no_components)
            || (history > 5.0 * period as f64
                && self.max_variance_increase < MINIMUM_VARIANCE_INCREASE_TO_KEEP
                && error_without_component <= error_with_component)
    }

    pub fn age(&mut self, factor: f64) {
        self.count *= factor;
        self.max_variance_increase *= factor;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("count", self.count);
        for mean in self.mean_errors {
            writer.field("mean_error", mean);
        }
        writer.field("max_variance_increase", self.max_variance_increase);
        writer.field("has_variance_increase", self.has_variance_increase);
    }

    pub fn restore(reader: &DocumentReader) -> Option<Self> {
        let mut mean_errors = [0.0; 3];
        let mut n = 0;
        for value in reader.values("mean_error") {
            if n == 3 {
                return None;
            }
            mean_errors[n] = value.parse().ok()?;
            n += 1;
        }
        if n != 3 {
            return None;
        }
        Some(Self {
            count: reader.parse("count")?,
            mean_errors,
            max_variance_increase: reader.parse("max_variance_increase")?,
            has_variance_increase: reader.parse("has_variance_increase")?,
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.f64(self.count);
        for mean in self.mean_errors {
            ck.f64(mean);
        }
        ck.f64(self.max_variance_increase).bool(self.has_variance_increase);
    }
}
