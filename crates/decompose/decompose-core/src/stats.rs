//! Statistical helpers shared across the engine.

use decompose_spi::{DocumentReader, DocumentWriter, MeanAccumulator, MeanVarAccumulator, TimePoint, DAY};

use crate::checksum::Checksummer;

/// Ageing factor for `dt` seconds of elapsed time against a reference
/// scale, default one day.
pub fn age_factor(decay_rate: f64, dt: TimePoint, scale: TimePoint) -> f64 {
    (-decay_rate * dt as f64 / scale as f64).exp()
}

pub fn age_factor_daily(decay_rate: f64, dt: TimePoint) -> f64 {
    age_factor(decay_rate, dt, DAY)
}

/// Propagate an accumulator forwards in whole steps of `step`: the
/// callback runs once per elapsed step with a unit step time. Flooring both
/// endpoints means abutting intervals never double-age, and per-step
/// application keeps the result bit-identical however an interval is
/// split.
pub fn stepwise_propagate(
    start: TimePoint,
    end: TimePoint,
    step: TimePoint,
    mut propagate_by_time: impl FnMut(f64),
) {
    let start = decompose_spi::floor_to(start, step);
    let end = decompose_spi::floor_to(end, step);
    let steps = (end - start).max(0) / step;
    for _ in 0..steps {
        propagate_by_time(1.0);
    }
}

// ============================================================================
// Accumulators
// ============================================================================

/// Running min and max.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinMaxAccumulator {
    min: Option<f64>,
    max: Option<f64>,
}

impl MinMaxAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// The signed distance of the bracket from zero: positive when every
    /// sample is positive, negative when every sample is negative, zero
    /// when the bracket straddles zero or is empty.
    pub fn sign_margin(&self) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) => {
                if min > 0.0 {
                    min
                } else if max < 0.0 {
                    max
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Running maximum with exponential forgetting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaxAccumulator {
    value: Option<f64>,
}

impl MaxAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.value = Some(self.value.map_or(value, |max| max.max(value)));
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn age(&mut self, factor: f64) {
        if let Some(value) = self.value.as_mut() {
            *value *= factor;
        }
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

// ============================================================================
// Distributions
// ============================================================================

/// Logistic sigmoid centered at `x0` with the given width; `sign` < 0
/// mirrors the curve.
pub fn logistic(x: f64, width: f64, x0: f64, sign: f64) -> f64 {
    1.0 / (1.0 + (-sign * (x - x0) / width).exp())
}

/// P(F <= f) for an F-distributed statistic with `df1` and `df2` degrees of
/// freedom.
pub fn left_tail_f_test(v1: f64, v2: f64, df1: f64, df2: f64) -> f64 {
    if v1 <= 0.0 || v2 <= 0.0 || df1 <= 0.0 || df2 <= 0.0 {
        return 1.0;
    }
    let f = v1 / v2;
    let x = df1 * f / (df1 * f + df2);
    incomplete_beta(0.5 * df1, 0.5 * df2, x)
}

/// Two-sided standard normal quantile: `z` such that
/// P(|N(0,1)| <= z) = confidence, confidence in [0, 1).
pub fn normal_quantile_two_sided(confidence: f64) -> f64 {
    let p = 0.5 + 0.5 * confidence.clamp(0.0, 1.0 - 1e-12);
    inverse_normal_cdf(p)
}

/// Acklam's rational approximation to the inverse standard normal CDF.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inverse_normal_cdf(1.0 - p)
    }
}

/// Regularized incomplete beta function I_x(a, b) by continued fraction.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - incomplete_beta(b, a, 1.0 - x)
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 200;
    const EPSILON: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Lanczos approximation to ln Gamma(x).
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000000000190015;
    for coefficient in COEFFICIENTS {
        y += 1.0;
        series += coefficient / y;
    }
    -tmp + (2.5066282746310005 * series / x).ln()
}

// ============================================================================
// Persistence and checksum helpers for the SPI accumulators
// ============================================================================

pub fn persist_mean(writer: &mut DocumentWriter, key: &str, acc: &MeanAccumulator) {
    writer.level(key, |w| {
        w.field("count", acc.count());
        w.field("mean", acc.mean());
    });
}

pub fn restore_mean(reader: &DocumentReader, key: &str) -> Option<MeanAccumulator> {
    let level = reader.level(key)?;
    Some(MeanAccumulator::from_parts(level.parse("count")?, level.parse("mean")?))
}

pub fn persist_mean_var(writer: &mut DocumentWriter, key: &str, acc: &MeanVarAccumulator) {
    writer.level(key, |w| {
        w.field("count", acc.count());
        w.field("mean", acc.mean());
        w.field("m2", acc.m2());
    });
}

pub fn restore_mean_var(reader: &DocumentReader, key: &str) -> Option<MeanVarAccumulator> {
    let level = reader.level(key)?;
    Some(MeanVarAccumulator::from_parts(
        level.parse("count")?,
        level.parse("mean")?,
        level.parse("m2")?,
    ))
}

pub fn checksum_mean(ck: &mut Checksummer, acc: &MeanAccumulator) {
    ck.f64(acc.count()).f64(acc.mean());
}

pub fn checksum_mean_var(ck: &mut Checksummer, acc: &MeanVarAccumulator) {
    ck.f64(acc.count()).f64(acc.mean()).f64(acc.m2());
}
