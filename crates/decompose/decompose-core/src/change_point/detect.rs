//! The change test run over the ring buffer's populated suffix.
//!
//! Candidate level shifts, scale changes, and trend onsets are scored with
//! weighted segment costs and picked by BIC against the no-change model.

use std::fmt;

use decompose_spi::{DocumentReader, DocumentWriter, MeanAccumulator, TimePoint};

use crate::checksum::Checksummer;

/// Which change kinds the test may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestableChanges {
    /// Only level shifts; used before any seasonality is modelled.
    LevelShift,
    All,
}

/// The kind and size of a detected change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangePointKind {
    LevelShift { shift: f64 },
    ScaleChange { scale: f64 },
    TrendOnset { slope: f64 },
}

/// A change detected in the residual stream.
#[derive(Debug, Clone)]
pub struct ChangePoint {
    kind: ChangePointKind,
    time: TimePoint,
    magnitude: f64,
    residuals: Vec<MeanAccumulator>,
}

impl ChangePoint {
    pub fn new(kind: ChangePointKind, time: TimePoint, magnitude: f64) -> Self {
        Self { kind, time, magnitude, residuals: Vec::new() }
    }

    pub fn kind(&self) -> ChangePointKind {
        self.kind
    }

    pub fn time(&self) -> TimePoint {
        self.time
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Residuals of the post-change regime against the changed model, used
    /// to rebuild downstream residual models.
    pub fn residuals(&self) -> &[MeanAccumulator] {
        &self.residuals
    }

    pub fn residuals_mut(&mut self) -> &mut Vec<MeanAccumulator> {
        &mut self.residuals
    }

    pub fn large_enough(&self, large_error: f64) -> bool {
        self.magnitude > large_error
    }

    pub fn long_enough(&self, time: TimePoint, minimum_change_length: TimePoint) -> bool {
        time - self.time >= minimum_change_length
    }

    /// Monitor for undoing this change if it proves wrong.
    pub fn undoable(&self) -> UndoableChangePoint {
        UndoableChangePoint {
            kind: self.kind,
            time: self.time,
            magnitude: self.magnitude,
            errors_with: MeanAccumulator::new(),
            errors_without: MeanAccumulator::new(),
        }
    }

    pub fn outlier_weight_derate(&self) -> OutlierWeightDerate {
        OutlierWeightDerate { magnitude: self.magnitude }
    }
}

impl fmt::Display for ChangePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChangePointKind::LevelShift { shift } => write!(f, "level shift by {shift:.3}"),
            ChangePointKind::ScaleChange { scale } => write!(f, "scale change by {scale:.3}"),
            ChangePointKind::TrendOnset { slope } => {
                write!(f, "trend onset with slope {slope:.3e}")
            }
        }
    }
}

// ============================================================================
// Undo monitor
// ============================================================================

/// Watches post-change errors and decides whether the applied change made
/// predictions worse than leaving the model alone would have.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoableChangePoint {
    kind: ChangePointKind,
    time: TimePoint,
    magnitude: f64,
    errors_with: MeanAccumulator,
    errors_without: MeanAccumulator,
}

impl UndoableChangePoint {
    const MINIMUM_COUNT_TO_UNDO: f64 = 8.0;

    pub fn time(&self) -> TimePoint {
        self.time
    }

    /// Record one observation. `prediction` is the current (changed)
    /// model's prediction at `time`.
    pub fn add(&mut self, time: TimePoint, value: f64, weight: f64, prediction: f64) {
        let undone = match self.kind {
            ChangePointKind::LevelShift { shift } => prediction - shift,
            ChangePointKind::ScaleChange { scale } => {
                if scale.abs() > 1e-12 {
                    prediction / scale
                } else {
                    prediction
                }
            }
            ChangePointKind::TrendOnset { slope } => {
                prediction - slope * (time - self.time) as f64
            }
        };
        let with = value - prediction;
        let without = value - undone;
        self.errors_with.add(with * with, weight);
        self.errors_without.add(without * without, weight);
    }

    pub fn should_undo(&self) -> bool {
        self.errors_with.count() >= Self::MINIMUM_COUNT_TO_UNDO
            && self.errors_with.mean() > self.errors_without.mean()
    }

    /// The inverse change which backs this one out.
    pub fn to_undo_change(&self) -> ChangePoint {
        let kind = match self.kind {
            ChangePointKind::LevelShift { shift } => ChangePointKind::LevelShift { shift: -shift },
            ChangePointKind::ScaleChange { scale } => ChangePointKind::ScaleChange {
                scale: if scale.abs() > 1e-12 { 1.0 / scale } else { 1.0 },
            },
            ChangePointKind::TrendOnset { slope } => ChangePointKind::TrendOnset { slope: -slope },
        };
        ChangePoint::new(kind, self.time, self.magnitude)
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        let (tag, a) = match self.kind {
            ChangePointKind::LevelShift { shift } => ("level_shift", shift),
            ChangePointKind::ScaleChange { scale } => ("scale_change", scale),
            ChangePointKind::TrendOnset { slope } => ("trend_onset", slope),
        };
        writer.field("kind", tag);
        writer.field("parameter", a);
        writer.field("time", self.time);
        writer.field("magnitude", self.magnitude);
        crate::stats::persist_mean(writer, "errors_with", &self.errors_with);
        crate::stats::persist_mean(writer, "errors_without", &self.errors_without);
    }

    pub fn restore(reader: &DocumentReader) -> Option<Self> {
        let parameter: f64 = reader.parse("parameter")?;
        let kind = match reader.value("kind")? {
            "level_shift" => ChangePointKind::LevelShift { shift: parameter },
            "scale_change" => ChangePointKind::ScaleChange { scale: parameter },
            "trend_onset" => ChangePointKind::TrendOnset { slope: parameter },
            _ => return None,
        };
        Some(Self {
            kind,
            time: reader.parse("time")?,
            magnitude: reader.parse("magnitude")?,
            errors_with: crate::stats::restore_mean(reader, "errors_with")?,
            errors_without: crate::stats::restore_mean(reader, "errors_without")?,
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        let (tag, parameter) = match self.kind {
            ChangePointKind::LevelShift { shift } => ("level_shift", shift),
            ChangePointKind::ScaleChange { scale } => ("scale_change", scale),
            ChangePointKind::TrendOnset { slope } => ("trend_onset", slope),
        };
        ck.str(tag).f64(parameter).i64(self.time).f64(self.magnitude);
        crate::stats::checksum_mean(ck, &self.errors_with);
        crate::stats::checksum_mean(ck, &self.errors_without);
    }
}

// ============================================================================
// Outlier weight derate
// ============================================================================

/// After a change is applied, errors of the change's own size should not be
/// treated as outliers while components re-learn the new regime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutlierWeightDerate {
    magnitude: f64,
}

impl OutlierWeightDerate {
    /// Fraction in [0, 1] by which outlier down-weighting should be reduced
    /// for an error of the given size.
    pub fn value(&self, error: f64) -> f64 {
        if self.magnitude > 0.0 {
            (error.abs() / self.magnitude).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("magnitude", self.magnitude);
    }

    pub fn restore(reader: &DocumentReader) -> Option<Self> {
        Some(Self { magnitude: reader.parse("magnitude")? })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.f64(self.magnitude);
    }
}

// ============================================================================
// The test
// ============================================================================

pub struct TestForChange<'a> {
    testable: TestableChanges,
    values_start_time: TimePoint,
    window_bucket_length: TimePoint,
    predictor: &'a mut dyn FnMut(TimePoint) -> f64,
    values: Vec<MeanAccumulator>,
    outlier_fraction: f64,
}

struct Sample {
    time: TimePoint,
    value: f64,
    prediction: f64,
    residual: f64,
    weight: f64,
}

impl<'a> TestForChange<'a> {
    const MINIMUM_SAMPLES: usize = 6;

    pub fn new(
        testable: TestableChanges,
        values_start_time: TimePoint,
        window_bucket_length: TimePoint,
        predictor: &'a mut dyn FnMut(TimePoint) -> f64,
        values: Vec<MeanAccumulator>,
        outlier_fraction: f64,
    ) -> Self {
        Self {
            testable,
            values_start_time,
            window_bucket_length,
            predictor,
            values,
            outlier_fraction,
        }
    }

    pub fn test(mut self) -> Option<ChangePoint> {
        let mut samples = Vec::with_capacity(self.values.len());
        for (index, value) in self.values.iter().enumerate() {
            if value.count() > 0.0 {
                let time =
                    self.values_start_time + index as TimePoint * self.window_bucket_length;
                let prediction = (self.predictor)(time);
                samples.push(Sample {
                    time,
                    value: value.mean(),
                    prediction,
                    residual: value.mean() - prediction,
                    weight: value.count(),
                });
            }
        }
        if samples.len() < Self::MINIMUM_SAMPLES {
            return None;
        }
        zero_outlier_weights(&mut samples, self.outlier_fraction);

        let n = samples.len();
        let total_weight: f64 = samples.iter().map(|s| s.weight).sum();
        if total_weight <= 0.0 {
            return None;
        }

        let sse_none = residual_sse(&samples, 0, n);
        let mut best: Option<(f64, ChangePointKind, usize)> = None;
        let mut consider = |bic: f64, kind: ChangePointKind, split: usize| {
            if best.as_ref().map_or(true, |(current, _, _)| bic < *current) {
                best = Some((bic, kind, split));
            }
        };

        let n_f = n as f64;
        let bic = |sse: f64, parameters: f64| n_f * (sse / n_f + 1e-12).ln() + parameters * n_f.ln();
        let bic_none = bic(sse_none, 1.0);

        let minimum_segment = (n / 10).max(2);
        for split in minimum_segment..=(n - minimum_segment) {
            // Level shift.
            let before = residual_sse(&samples, 0, split);
            let after = residual_sse(&samples, split, n);
            let shift = residual_mean(&samples, split, n) - residual_mean(&samples, 0, split);
            consider(bic(before + after, 3.0), ChangePointKind::LevelShift { shift }, split);

            if self.testable == TestableChanges::All {
                // Trend onset: linear residual growth after the split.
                if let Some((sse_linear, slope)) = linear_fit_sse(&samples, split, n) {
                    consider(
                        bic(before + sse_linear, 4.0),
                        ChangePointKind::TrendOnset { slope },
                        split,
                    );
                }
                // Scale change: the prediction pattern re-scaled after the
                // split.
                if let Some((sse_scaled, scale)) = scaled_prediction_sse(&samples, split, n) {
                    consider(
                        bic(before + sse_scaled, 3.0),
                        ChangePointKind::ScaleChange { scale },
                        split,
                    );
                }
            }
        }

        let (bic_best, kind, split) = best?;
        if bic_best >= bic_none {
            return None;
        }

        let time = samples[split].time;
        let magnitude = match kind {
            ChangePointKind::LevelShift { shift } => shift.abs(),
            ChangePointKind::ScaleChange { scale } => {
                let mean_amplitude = samples[split..]
                    .iter()
                    .map(|s| s.prediction.abs() * s.weight)
                    .sum::<f64>()
                    / samples[split..].iter().map(|s| s.weight).sum::<f64>().max(1e-12);
                (scale - 1.0).abs() * mean_amplitude
            }
            ChangePointKind::TrendOnset { slope } => {
                (slope * (samples[n - 1].time - time) as f64).abs()
            }
        };

        let mut change = ChangePoint::new(kind, time, magnitude);
        *change.residuals_mut() = samples[split..]
            .iter()
            .map(|sample| {
                let model = match kind {
                    ChangePointKind::LevelShift { shift } => sample.prediction + shift,
                    ChangePointKind::ScaleChange { scale } => sample.prediction * scale,
                    ChangePointKind::TrendOnset { slope } => {
                        sample.prediction + slope * (sample.time - time) as f64
                    }
                };
                MeanAccumulator::with_sample(sample.value - model, sample.weight.max(1e-3))
            })
            .collect();
        Some(change)
    }
}

fn residual_mean(samples: &[Sample], begin: usize, end: usize) -> f64 {
    let mut mean = MeanAccumulator::new();
    for sample in &samples[begin..end] {
        mean.add(sample.residual, sample.weight);
    }
    mean.mean()
}

fn residual_sse(samples: &[Sample], begin: usize, end: usize) -> f64 {
    let mean = residual_mean(samples, begin, end);
    samples[begin..end]
        .iter()
        .map(|sample| sample.weight * (sample.residual - mean) * (sample.residual - mean))
        .sum()
}

/// Weighted linear fit of residual against time; `(sse, slope per second)`.
fn linear_fit_sse(samples: &[Sample], begin: usize, end: usize) -> Option<(f64, f64)> {
    if end - begin < 3 {
        return None;
    }
    let t0 = samples[begin].time;
    let mut w = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for sample in &samples[begin..end] {
        let x = (sample.time - t0) as f64;
        w += sample.weight;
        sx += sample.weight * x;
        sy += sample.weight * sample.residual;
        sxx += sample.weight * x * x;
        sxy += sample.weight * x * sample.residual;
    }
    let determinant = w * sxx - sx * sx;
    if determinant.abs() < 1e-12 {
        return None;
    }
    let slope = (w * sxy - sx * sy) / determinant;
    let intercept = (sy - slope * sx) / w;
    let sse = samples[begin..end]
        .iter()
        .map(|sample| {
            let x = (sample.time - t0) as f64;
            let error = sample.residual - intercept - slope * x;
            sample.weight * error * error
        })
        .sum();
    Some((sse, slope))
}

/// Least-squares scale of the prediction pattern; `(sse, scale)`.
fn scaled_prediction_sse(samples: &[Sample], begin: usize, end: usize) -> Option<(f64, f64)> {
    let mut spp = 0.0;
    let mut svp = 0.0;
    for sample in &samples[begin..end] {
        spp += sample.weight * sample.prediction * sample.prediction;
        svp += sample.weight * sample.value * sample.prediction;
    }
    if spp < 1e-8 {
        return None;
    }
    let scale = svp / spp;
    let sse = samples[begin..end]
        .iter()
        .map(|sample| {
            let error = sample.value - scale * sample.prediction;
            sample.weight * error * error
        })
        .sum();
    Some((sse, scale))
}

fn zero_outlier_weights(samples: &mut [Sample], outlier_fraction: f64) {
    let to_drop = (outlier_fraction * samples.len() as f64).floor() as usize;
    if to_drop == 0 {
        return;
    }
    let mean = residual_mean(samples, 0, samples.len());
    let mut deviations: Vec<(f64, usize)> = samples
        .iter()
        .enumerate()
        .map(|(index, sample)| ((sample.residual - mean).abs(), index))
        .collect();
    deviations.sort_by(|a, b| b.0.total_cmp(&a.0));
    for &(_, index) in deviations.iter().take(to_drop) {
        samples[index].weight = 0.0;
    }
}
