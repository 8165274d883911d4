//! Adaptive bucketed periodic function.
//!
//! The interpolant inside every seasonal and calendar component. One period
//! is divided into a fixed number of buckets; each bucket carries a small
//! online regression over absolute time plus value moments, so the shape can
//! drift with the stream. Predictions read from knots that are refreshed
//! ("re-interpolated") once per period, which keeps per-observation reads
//! cheap and decouples them from in-flight bucket updates.

use decompose_spi::{
    floor_to, DocumentReader, DocumentWriter, MeanVarAccumulator, TimePoint, WEEK,
};

use crate::checksum::Checksummer;
use crate::regression::OnlineRegression;
use crate::stats;

fn scale_time(time: TimePoint, origin: TimePoint) -> f64 {
    (time - origin) as f64 / WEEK as f64
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Bucket {
    regression: OnlineRegression,
    moments: MeanVarAccumulator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketedPeriodicFunction {
    period: TimePoint,
    decay_rate: f64,
    origin: TimePoint,
    buckets: Vec<Bucket>,
    knots: Vec<f64>,
    knot_variances: Vec<f64>,
    mean_value: f64,
    mean_variance: f64,
    initialized: bool,
    next_interpolation: Option<TimePoint>,
}

impl BucketedPeriodicFunction {
    pub fn new(period: TimePoint, size: usize, decay_rate: f64) -> Self {
        let size = size.max(2);
        Self {
            period,
            decay_rate,
            origin: 0,
            buckets: vec![Bucket::default(); size],
            knots: vec![0.0; size],
            knot_variances: vec![0.0; size],
            mean_value: 0.0,
            mean_variance: 0.0,
            initialized: false,
            next_interpolation: None,
        }
    }

    pub fn period(&self) -> TimePoint {
        self.period
    }

    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    fn bucket_index(&self, offset: TimePoint) -> usize {
        let offset = offset.rem_euclid(self.period);
        ((offset as u128 * self.buckets.len() as u128 / self.period as u128) as usize)
            .min(self.buckets.len() - 1)
    }

    fn bucket_centre(&self, index: usize) -> f64 {
        (index as f64 + 0.5) * self.period as f64 / self.buckets.len() as f64
    }

    pub fn add(&mut self, time: TimePoint, offset: TimePoint, value: f64, weight: f64) {
        let index = self.bucket_index(offset);
        let x = scale_time(time, self.origin);
        self.buckets[index].regression.add(x, value, weight);
        self.buckets[index].moments.add(value, weight);
        if self.next_interpolation.is_none() {
            self.next_interpolation = Some(floor_to(time, self.period) + self.period);
        }
    }

    pub fn should_interpolate(&self, time: TimePoint) -> bool {
        self.next_interpolation.is_some_and(|next| time >= next)
    }

    /// Refresh the knots from the bucket regressions as of `time`. With
    /// `refine` false the refresh does not reschedule, which is how
    /// read-only forecast interpolation is driven.
    pub fn interpolate(&mut self, time: TimePoint, refine: bool) {
        let x = scale_time(time, self.origin);
        let mut populated = 0usize;
        let mut level = 0.0;
        let mut level_weight = 0.0;

        for (index, bucket) in self.buckets.iter().enumerate() {
            if bucket.regression.count() > 0.0 {
                populated += 1;
                let value = bucket.regression.predict(x);
                self.knots[index] = value;
                self.knot_variances[index] = bucket.moments.variance();
                level += bucket.regression.count() * value;
                level_weight += bucket.regression.count();
            }
        }

        if populated > 0 {
            let fallback = level / level_weight;
            for (index, bucket) in self.buckets.iter().enumerate() {
                if bucket.regression.count() == 0.0 && !self.initialized {
                    self.knots[index] = fallback;
                    self.knot_variances[index] = 0.0;
                }
            }
            self.mean_value = self.knots.iter().sum::<f64>() / self.knots.len() as f64;
            self.mean_variance =
                self.knot_variances.iter().sum::<f64>() / self.knot_variances.len() as f64;
            self.initialized = 2 * populated >= self.buckets.len();
        }

        if refine {
            self.next_interpolation = Some(floor_to(time, self.period) + self.period);
        }
    }

    /// Interpolated `(mean, variance)` at the given offset into the period.
    pub fn value(&self, offset: TimePoint) -> (f64, f64) {
        if !self.initialized {
            return (0.0, 0.0);
        }
        let n = self.buckets.len();
        let offset = offset.rem_euclid(self.period) as f64;
        let bucket_length = self.period as f64 / n as f64;

        // Linear interpolation between the two surrounding bucket centres,
        // wrapping across the period boundary.
        let position = offset / bucket_length - 0.5;
        let left = position.floor();
        let fraction = position - left;
        let left_index = (left as i64).rem_euclid(n as i64) as usize;
        let right_index = (left_index + 1) % n;

        let mean =
            (1.0 - fraction) * self.knots[left_index] + fraction * self.knots[right_index];
        let variance = (1.0 - fraction) * self.knot_variances[left_index]
            + fraction * self.knot_variances[right_index];
        (mean, variance)
    }

    pub fn mean_value(&self) -> f64 {
        if self.initialized {
            self.mean_value
        } else {
            0.0
        }
    }

    pub fn mean_variance(&self) -> f64 {
        if self.initialized {
            self.mean_variance
        } else {
            0.0
        }
    }

    /// Count-weighted mean slope of the bucket regressions, per second.
    pub fn slope(&self) -> f64 {
        let mut slope = 0.0;
        let mut weight = 0.0;
        for bucket in &self.buckets {
            if bucket.regression.count() > 0.0 {
                slope += bucket.regression.count() * bucket.regression.slope();
                weight += bucket.regression.count();
            }
        }
        if weight > 0.0 {
            slope / weight / WEEK as f64
        } else {
            0.0
        }
    }

    /// Whether enough history has accumulated for the slope to be trusted.
    pub fn slope_accurate(&self) -> bool {
        let count: f64 = self.buckets.iter().map(|b| b.regression.count()).sum();
        self.initialized && count >= 2.0 * self.buckets.len() as f64
    }

    pub fn shift_level(&mut self, delta: f64) {
        for bucket in &mut self.buckets {
            bucket.regression.shift_ordinate(delta);
        }
        for knot in &mut self.knots {
            *knot += delta;
        }
        if self.initialized {
            self.mean_value += delta;
        }
    }

    /// Add `delta` (units per second) to every bucket's slope, pivoting at
    /// `time` so current predictions are unchanged.
    pub fn shift_slope(&mut self, time: TimePoint, delta: f64) {
        let gradient = delta * WEEK as f64;
        let x = scale_time(time, self.origin);
        for bucket in &mut self.buckets {
            bucket.regression.shift_gradient(gradient);
            bucket.regression.shift_ordinate(-gradient * x);
        }
    }

    pub fn shift_origin(&mut self, time: TimePoint) {
        let origin = floor_to(time, WEEK);
        if origin > self.origin {
            let dx = scale_time(origin, self.origin);
            for bucket in &mut self.buckets {
                bucket.regression.shift_abscissa(-dx);
            }
            self.origin = origin;
        }
    }

    /// Scale the function about zero, as applied by scale-change points.
    pub fn apply_scale(&mut self, factor: f64) {
        for bucket in &mut self.buckets {
            bucket.regression.scale_ordinate(factor);
            bucket.moments.scale(factor);
        }
        for knot in &mut self.knots {
            *knot *= factor;
        }
        for variance in &mut self.knot_variances {
            *variance *= factor * factor;
        }
        self.mean_value *= factor;
        self.mean_variance *= factor * factor;
    }

    pub fn age(&mut self, factor: f64) {
        for bucket in &mut self.buckets {
            bucket.regression.age(factor);
            bucket.moments.age(factor);
        }
    }

    pub fn is_bad(&self) -> bool {
        !self.mean_value.is_finite()
            || self.knots.iter().any(|knot| !knot.is_finite())
            || self.knot_variances.iter().any(|variance| !variance.is_finite())
    }

    /// Estimate the leakage of a subharmonic with the given shorter period
    /// into this function: the mean of this function's centred values at
    /// offsets congruent to `offset` modulo the shorter period, clamped to
    /// the magnitude of the shorter component's own centred `value`.
    pub fn delta(&self, offset: TimePoint, shorter_period: TimePoint, value: f64) -> f64 {
        if !self.initialized || shorter_period <= 0 || self.period % shorter_period != 0 {
            return 0.0;
        }
        let repeats = self.period / shorter_period;
        let mut leakage = 0.0;
        for k in 0..repeats {
            leakage += self.value(offset + k * shorter_period).0 - self.mean_value();
        }
        (leakage / repeats as f64).clamp(-value.abs(), value.abs())
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.buckets.capacity() * std::mem::size_of::<Bucket>()
            + (self.knots.capacity() + self.knot_variances.capacity())
                * std::mem::size_of::<f64>()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("period", self.period);
        writer.field("size", self.buckets.len());
        writer.field("origin", self.origin);
        writer.field("initialized", self.initialized);
        writer.field("mean_value", self.mean_value);
        writer.field("mean_variance", self.mean_variance);
        if let Some(next) = self.next_interpolation {
            writer.field("next_interpolation", next);
        }
        for bucket in &self.buckets {
            writer.level("bucket", |w| {
                bucket.regression.persist(w, "regression");
                stats::persist_mean_var(w, "moments", &bucket.moments);
            });
        }
        for knot in &self.knots {
            writer.field("knot", knot);
        }
        for variance in &self.knot_variances {
            writer.field("knot_variance", variance);
        }
    }

    pub fn restore(reader: &DocumentReader, decay_rate: f64) -> Option<Self> {
        let period: TimePoint = reader.parse("period")?;
        let size: usize = reader.parse("size")?;
        let mut result = Self::new(period, size, decay_rate);
        result.origin = reader.parse("origin")?;
        result.initialized = reader.parse("initialized")?;
        result.mean_value = reader.parse("mean_value")?;
        result.mean_variance = reader.parse("mean_variance")?;
        result.next_interpolation = reader.parse("next_interpolation");

        let mut buckets = Vec::with_capacity(size);
        for level in reader.levels("bucket") {
            buckets.push(Bucket {
                regression: OnlineRegression::restore(&level, "regression")?,
                moments: stats::restore_mean_var(&level, "moments")?,
            });
        }
        if buckets.len() != size {
            return None;
        }
        result.buckets = buckets;

        let mut knots = Vec::with_capacity(size);
        for value in reader.values("knot") {
            knots.push(value.parse().ok()?);
        }
        let mut knot_variances = Vec::with_capacity(size);
        for value in reader.values("knot_variance") {
            knot_variances.push(value.parse().ok()?);
        }
        if knots.len() != size || knot_variances.len() != size {
            return None;
        }
        result.knots = knots;
        result.knot_variances = knot_variances;
        Some(result)
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.i64(self.period)
            .usize(self.buckets.len())
            .i64(self.origin)
            .bool(self.initialized)
            .f64(self.mean_value)
            .f64(self.mean_variance)
            .i64(self.next_interpolation.unwrap_or(0));
        for bucket in &self.buckets {
            bucket.regression.checksum(ck);
            stats::checksum_mean_var(ck, &bucket.moments);
        }
        for &knot in &self.knots {
            ck.f64(knot);
        }
        for &variance in &self.knot_variances {
            ck.f64(variance);
        }
    }
}
