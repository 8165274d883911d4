//! Weighted online least squares.
//!
//! Fits `y = intercept + slope * x` incrementally from weighted moments.
//! The abscissa is expected to be pre-conditioned (scaled relative to an
//! origin) by the caller; the moments support ageing and the shift
//! operations needed by canonicalization and change-point application.

use decompose_spi::{DocumentReader, DocumentWriter};

use crate::checksum::Checksummer;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OnlineRegression {
    count: f64,
    mean_x: f64,
    mean_y: f64,
    mean_x2: f64,
    mean_xy: f64,
}

impl OnlineRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64, y: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.count += weight;
        let alpha = weight / self.count;
        self.mean_x += alpha * (x - self.mean_x);
        self.mean_y += alpha * (y - self.mean_y);
        self.mean_x2 += alpha * (x * x - self.mean_x2);
        self.mean_xy += alpha * (x * y - self.mean_xy);
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    /// Fitted `(intercept, slope)`. Falls back to a constant fit when the
    /// abscissa carries no information.
    pub fn parameters(&self) -> (f64, f64) {
        let variance_x = self.mean_x2 - self.mean_x * self.mean_x;
        if self.count <= 0.0 || variance_x < 1e-12 {
            return (self.mean_y, 0.0);
        }
        let covariance = self.mean_xy - self.mean_x * self.mean_y;
        let slope = covariance / variance_x;
        (self.mean_y - slope * self.mean_x, slope)
    }

    pub fn slope(&self) -> f64 {
        self.parameters().1
    }

    pub fn predict(&self, x: f64) -> f64 {
        let (intercept, slope) = self.parameters();
        intercept + slope * x
    }

    /// Number of effective model parameters given the data seen.
    pub fn parameter_count(&self) -> f64 {
        if self.count >= 2.0 {
            2.0
        } else if self.count > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    pub fn age(&mut self, factor: f64) {
        self.count *= factor;
    }

    /// Translate the abscissa: `x -> x + dx`.
    pub fn shift_abscissa(&mut self, dx: f64) {
        self.mean_x2 += dx * (2.0 * self.mean_x + dx);
        self.mean_xy += dx * self.mean_y;
        self.mean_x += dx;
    }

    /// Translate the ordinate: `y -> y + dy`.
    pub fn shift_ordinate(&mut self, dy: f64) {
        self.mean_xy += dy * self.mean_x;
        self.mean_y += dy;
    }

    /// Add `dg` to the fitted slope, pivoting at the abscissa origin.
    pub fn shift_gradient(&mut self, dg: f64) {
        self.mean_y += dg * self.mean_x;
        self.mean_xy += dg * self.mean_x2;
    }

    /// Scale the ordinate: `y -> factor * y`.
    pub fn scale_ordinate(&mut self, factor: f64) {
        self.mean_y *= factor;
        self.mean_xy *= factor;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn persist(&self, writer: &mut DocumentWriter, key: &str) {
        writer.level(key, |w| {
            w.field("count", self.count);
            w.field("mean_x", self.mean_x);
            w.field("mean_y", self.mean_y);
            w.field("mean_x2", self.mean_x2);
            w.field("mean_xy", self.mean_xy);
        });
    }

    pub fn restore(reader: &DocumentReader, key: &str) -> Option<Self> {
        let level = reader.level(key)?;
        Some(Self {
            count: level.parse("count")?,
            mean_x: level.parse("mean_x")?,
            mean_y: level.parse("mean_y")?,
            mean_x2: level.parse("mean_x2")?,
            mean_xy: level.parse("mean_xy")?,
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.f64(self.count)
            .f64(self.mean_x)
            .f64(self.mean_y)
            .f64(self.mean_x2)
            .f64(self.mean_xy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit_line() -> OnlineRegression {
        let mut regression = OnlineRegression::new();
        for i in 0..20 {
            let x = i as f64;
            regression.add(x, 3.0 + 2.0 * x, 1.0);
        }
        regression
    }

    #[test]
    fn test_recovers_line() {
        let regression = fit_line();
        let (intercept, slope) = regression.parameters();
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((regression.predict(30.0) - 63.0).abs() < 1e-8);
    }

    #[test]
    fn test_constant_fallback() {
        let mut regression = OnlineRegression::new();
        regression.add(1.0, 5.0, 1.0);
        regression.add(1.0, 7.0, 1.0);
        let (intercept, slope) = regression.parameters();
        assert_eq!(slope, 0.0);
        assert!((intercept - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_shift_ordinate() {
        let mut regression = fit_line();
        regression.shift_ordinate(10.0);
        let (intercept, slope) = regression.parameters();
        assert!((intercept - 13.0).abs() < 1e-9);
        assert!((slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_shift_gradient_pivots_at_origin() {
        let mut regression = fit_line();
        regression.shift_gradient(0.5);
        let (intercept, slope) = regression.parameters();
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((slope - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_shift_abscissa() {
        let mut regression = fit_line();
        // x -> x + 10 means the same data looks like y = 3 + 2(x - 10).
        regression.shift_abscissa(10.0);
        let (intercept, slope) = regression.parameters();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - (3.0 - 20.0)).abs() < 1e-8);
    }

    #[test]
    fn test_scale_ordinate() {
        let mut regression = fit_line();
        regression.scale_ordinate(2.0);
        let (intercept, slope) = regression.parameters();
        assert!((intercept - 6.0).abs() < 1e-9);
        assert!((slope - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_age_preserves_fit() {
        let mut regression = fit_line();
        regression.age(0.5);
        let (intercept, slope) = regression.parameters();
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((regression.count() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_document_round_trip() {
        let regression = fit_line();
        let mut writer = DocumentWriter::new();
        regression.persist(&mut writer, "r");
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let restored = OnlineRegression::restore(&reader, "r").unwrap();
        assert_eq!(regression, restored);
    }
}
