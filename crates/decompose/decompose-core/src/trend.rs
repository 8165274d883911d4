//! Long-term trend component.

use decompose_spi::{floor_to, DocumentReader, DocumentWriter, MeanVarAccumulator, TimePoint, WEEK};

use crate::checksum::Checksummer;
use crate::regression::OnlineRegression;
use crate::stats::{self, age_factor_daily};

/// Scale regression time to improve the condition of the design matrix.
fn scale_time(time: TimePoint, origin: TimePoint) -> f64 {
    (time - origin) as f64 / WEEK as f64
}

/// A regression model of the long-term level and slope of the stream,
/// mapping `time -> (mean, variance)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendComponent {
    decay_rate: f64,
    regression: OnlineRegression,
    residual_moments: MeanVarAccumulator,
    origin: TimePoint,
    first_time: Option<TimePoint>,
    last_time: Option<TimePoint>,
}

impl TrendComponent {
    pub fn new(decay_rate: f64) -> Self {
        Self { decay_rate, ..Self::default() }
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
    }

    pub fn initialized(&self) -> bool {
        self.regression.count() > 0.0
    }

    pub fn add(&mut self, time: TimePoint, value: f64, weight: f64) {
        if self.regression.count() >= 2.0 {
            let residual = value - self.value(time).0;
            self.residual_moments.add(residual, weight);
        }
        self.regression.add(scale_time(time, self.origin), value, weight);
        if self.first_time.is_none() {
            self.first_time = Some(time);
        }
        self.last_time = Some(self.last_time.map_or(time, |last| last.max(time)));
    }

    /// Predicted `(mean, variance)` at `time`.
    pub fn value(&self, time: TimePoint) -> (f64, f64) {
        if !self.initialized() {
            return (0.0, 0.0);
        }
        (self.regression.predict(scale_time(time, self.origin)), self.residual_moments.variance())
    }

    /// The variance of the trend's one-step prediction errors.
    pub fn variance(&self) -> f64 {
        self.residual_moments.variance()
    }

    pub fn slope(&self) -> f64 {
        self.regression.slope() / WEEK as f64
    }

    /// Number of fitted parameters, for degree-of-freedom accounting.
    pub fn parameters(&self) -> f64 {
        self.regression.parameter_count()
    }

    /// Span of time covered by the observations.
    pub fn observed_interval(&self) -> TimePoint {
        match (self.first_time, self.last_time) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    pub fn shift_level(&mut self, delta: f64) {
        self.regression.shift_ordinate(delta);
    }

    /// Add `delta` (units per second) to the slope, pivoting at `time`.
    pub fn shift_slope(&mut self, time: TimePoint, delta: f64) {
        let gradient = delta * WEEK as f64;
        self.regression.shift_gradient(gradient);
        self.regression.shift_ordinate(-gradient * scale_time(time, self.origin));
    }

    /// Move the regression origin forwards to keep the abscissa small.
    pub fn shift_origin(&mut self, time: TimePoint) {
        let origin = floor_to(time, WEEK);
        if origin > self.origin {
            self.regression.shift_abscissa(-scale_time(origin, self.origin));
            self.origin = origin;
        }
    }

    pub fn propagate_forwards_by_time(&mut self, dt: TimePoint) {
        if dt <= 0 {
            return;
        }
        let factor = age_factor_daily(self.decay_rate, dt);
        self.regression.age(factor);
        self.residual_moments.age(factor);
    }

    pub fn clear(&mut self) {
        let decay_rate = self.decay_rate;
        *self = Self::new(decay_rate);
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        self.regression.persist(writer, "regression");
        stats::persist_mean_var(writer, "residual_moments", &self.residual_moments);
        writer.field("origin", self.origin);
        if let Some(first) = self.first_time {
            writer.field("first_time", first);
        }
        if let Some(last) = self.last_time {
            writer.field("last_time", last);
        }
    }

    pub fn restore(reader: &DocumentReader, decay_rate: f64) -> Option<Self> {
        Some(Self {
            decay_rate,
            regression: OnlineRegression::restore(reader, "regression")?,
            residual_moments: stats::restore_mean_var(reader, "residual_moments")?,
            origin: reader.parse("origin")?,
            first_time: reader.parse("first_time"),
            last_time: reader.parse("last_time"),
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        self.regression.checksum(ck);
        stats::checksum_mean_var(ck, &self.residual_moments);
        ck.i64(self.origin)
            .i64(self.first_time.unwrap_or(0))
            .i64(self.last_time.unwrap_or(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decompose_spi::DAY;

    fn linear_trend() -> TrendComponent {
        let mut trend = TrendComponent::new(0.012);
        for i in 0..100 {
            let time = i * 3600;
            trend.add(time, 10.0 + time as f64 * 1e-4, 1.0);
        }
        trend
    }

    #[test]
    fn test_tracks_linear_signal() {
        let trend = linear_trend();
        let t = 100 * 3600;
        let (mean, variance) = trend.value(t);
        assert!((mean - (10.0 + t as f64 * 1e-4)).abs() < 1e-6);
        assert!(variance < 1e-9);
        assert!((trend.slope() - 1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_shift_level() {
        let mut trend = linear_trend();
        let before = trend.value(0).0;
        trend.shift_level(5.0);
        assert!((trend.value(0).0 - before - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_shift_slope_pivots() {
        let mut trend = linear_trend();
        let pivot = 50 * 3600;
        let at_pivot = trend.value(pivot).0;
        trend.shift_slope(pivot, 1e-4);
        assert!((trend.value(pivot).0 - at_pivot).abs() < 1e-8);
        assert!((trend.slope() - 2e-4).abs() < 1e-9);
    }

    #[test]
    fn test_shift_origin_preserves_predictions() {
        let mut trend = linear_trend();
        let prediction = trend.value(90 * 3600).0;
        trend.shift_origin(3 * WEEK);
        assert!((trend.value(90 * 3600).0 - prediction).abs() < 1e-8);
    }

    #[test]
    fn test_observed_interval_and_parameters() {
        let trend = linear_trend();
        assert_eq!(trend.observed_interval(), 99 * 3600);
        assert_eq!(trend.parameters(), 2.0);
        assert_eq!(TrendComponent::new(0.012).parameters(), 0.0);
    }

    #[test]
    fn test_propagate_ages() {
        let mut trend = linear_trend();
        let before = trend.value(0).0;
        trend.propagate_forwards_by_time(DAY);
        // Prediction is unchanged, only the effective count decays.
        assert!((trend.value(0).0 - before).abs() < 1e-9);
    }

    #[test]
    fn test_document_round_trip() {
        let trend = linear_trend();
        let mut writer = DocumentWriter::new();
        trend.persist(&mut writer);
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let restored = TrendComponent::restore(&reader, trend.decay_rate()).unwrap();

        let mut a = Checksummer::new();
        trend.checksum(&mut a);
        let mut b = Checksummer::new();
        restored.checksum(&mut b);
        assert_eq!(a.finish(), b.finish());
    }
}
