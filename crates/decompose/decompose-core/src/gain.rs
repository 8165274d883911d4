//! Gain control for the component update loop.
//!
//! Feeding each observation's error into every component is a closed loop:
//! if the components' aggregate amplitude is growing, the loop is close to
//! instability and updates must be damped. The controller tracks the mean
//! sum of component prediction amplitudes and a regression of that mean
//! over time; a positive slope beyond one percent of the mean amplitude
//! trips the low gain.

use decompose_spi::{floor_to, DocumentReader, DocumentWriter, MeanAccumulator, TimePoint, WEEK};

use crate::checksum::Checksummer;
use crate::regression::OnlineRegression;
use crate::stats;

/// Gain when amplitudes are growing. Anything less than one keeps the
/// update dynamics stable; the margin covers detection lag.
const DAMPED_GAIN: f64 = 0.8;
/// Gain when amplitudes are steady.
const STEADY_GAIN: f64 = 3.0;
/// Slope threshold as a fraction of the mean amplitude.
const AMPLITUDE_SLOPE_THRESHOLD: f64 = 0.01;

fn scale_time(time: TimePoint, origin: TimePoint) -> f64 {
    (time - origin) as f64 / WEEK as f64
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainController {
    regression_origin: TimePoint,
    mean_sum_amplitudes: MeanAccumulator,
    mean_sum_amplitudes_trend: OnlineRegression,
}

impl GainController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gain(&self) -> f64 {
        if self.mean_sum_amplitudes_trend.count() > 0.0 {
            let slope = self.mean_sum_amplitudes_trend.slope();
            if slope > AMPLITUDE_SLOPE_THRESHOLD * self.mean_sum_amplitudes.mean() {
                return DAMPED_GAIN;
            }
        }
        STEADY_GAIN
    }

    /// Seed the amplitude mean without touching its trend, used when
    /// replaying history after components change.
    pub fn seed(&mut self, predictions: &[f64]) {
        let sum: f64 = predictions.iter().map(|prediction| prediction.abs()).sum();
        self.mean_sum_amplitudes.add(sum, 1.0);
    }

    pub fn add(&mut self, time: TimePoint, predictions: &[f64]) {
        if predictions.is_empty() {
            return;
        }
        let sum: f64 = predictions.iter().map(|prediction| prediction.abs()).sum();
        self.mean_sum_amplitudes.add(sum, 1.0);
        self.mean_sum_amplitudes_trend.add(
            scale_time(time, self.regression_origin),
            self.mean_sum_amplitudes.mean(),
            self.mean_sum_amplitudes.count(),
        );
    }

    pub fn age(&mut self, factor: f64) {
        self.mean_sum_amplitudes.age(factor);
        self.mean_sum_amplitudes_trend.age(factor);
    }

    pub fn shift_origin(&mut self, time: TimePoint) {
        let origin = floor_to(time, WEEK);
        if origin > self.regression_origin {
            self.mean_sum_amplitudes_trend
                .shift_abscissa(-scale_time(origin, self.regression_origin));
            self.regression_origin = origin;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("regression_origin", self.regression_origin);
        stats::persist_mean(writer, "mean_sum_amplitudes", &self.mean_sum_amplitudes);
        self.mean_sum_amplitudes_trend.persist(writer, "mean_sum_amplitudes_trend");
    }

    pub fn restore(reader: &DocumentReader) -> Option<Self> {
        Some(Self {
            regression_origin: reader.parse("regression_origin")?,
            mean_sum_amplitudes: stats::restore_mean(reader, "mean_sum_amplitudes")?,
            mean_sum_amplitudes_trend: OnlineRegression::restore(
                reader,
                "mean_sum_amplitudes_trend",
            )?,
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.i64(self.regression_origin);
        stats::checksum_mean(ck, &self.mean_sum_amplitudes);
        self.mean_sum_amplitudes_trend.checksum(ck);
    }
}
