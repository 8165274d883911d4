//! Default seasonality hypothesis search.
//!
//! An autocorrelation-based search making the crate usable out of the box:
//! it finds the dominant period of a preconditioned window and recognizes
//! the weekday/weekend partition. Embedders with a richer hypothesis
//! search supply their own `SeasonalitySearch` at construction.

use decompose_spi::{
    MeanAccumulator, ModelledSeasonality, SearchParams, SeasonalComponentProposal,
    SeasonalDecomposition, SeasonalTime, SeasonalitySearch, TimePoint, TrendProposal, WindowView,
    DAY, HOUR, MINUTE, WEEK,
};

/// Weekend window offsets inside an epoch-anchored week. The epoch is a
/// Thursday, so Saturday starts two days in.
const WEEKEND_START: TimePoint = 2 * DAY;
const WEEKEND_END: TimePoint = 4 * DAY;

/// Fraction of the window variance a candidate period's profile must
/// explain.
const MINIMUM_EXPLAINED_VARIANCE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct AutocorrelationSearch {
    /// Minimum autocorrelation to consider a period significant.
    threshold: f64,
}

impl AutocorrelationSearch {
    pub fn new() -> Self {
        Self { threshold: 0.3 }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for AutocorrelationSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SeasonalitySearch for AutocorrelationSearch {
    fn decompose(
        &self,
        window: &WindowView,
        params: &SearchParams,
        modelled: &[ModelledSeasonality],
    ) -> Option<SeasonalDecomposition> {
        if params.maximum_components == 0 {
            return None;
        }
        let n = window.values.len();
        let populated = window.values.iter().filter(|value| value.count() > 0.0).count();
        if populated < 12 || 2 * populated < n {
            return None;
        }

        let mean = overall_mean(&window.values);

        // The weekday/weekend partition first: it is not a pure period so
        // autocorrelation alone misses it.
        if let Some(proposal) = self.test_weekend_partition(window, params, modelled, mean) {
            return Some(proposal);
        }

        self.test_periodic(window, params, modelled, mean)
    }
}

impl AutocorrelationSearch {
    fn test_periodic(
        &self,
        window: &WindowView,
        params: &SearchParams,
        modelled: &[ModelledSeasonality],
        mean: f64,
    ) -> Option<SeasonalDecomposition> {
        let n = window.values.len();
        let data: Vec<f64> = window
            .values
            .iter()
            .map(|value| if value.count() > 0.0 { value.mean() - mean } else { 0.0 })
            .collect();
        let variance: f64 = data.iter().map(|x| x * x).sum::<f64>();
        if variance <= 0.0 {
            return None;
        }

        let lag_floor = ((params.minimum_period + window.bucket_length - 1)
            / window.bucket_length)
            .max(4) as usize;
        let max_lag = n / 2;
        if lag_floor + 1 > max_lag {
            return None;
        }
        let acf: Vec<f64> = (0..=max_lag + 1)
            .map(|lag| {
                data.iter()
                    .take(n - lag)
                    .zip(data.iter().skip(lag))
                    .map(|(a, b)| a * b)
                    .sum::<f64>()
                    / variance
            })
            .collect();
        // Only local maxima are period candidates; the shoulder of the
        // lag-zero peak always dominates otherwise.
        let mut best_lag = 0;
        let mut best_acf = 0.0;
        for lag in lag_floor..=max_lag {
            if acf[lag] > self.threshold
                && acf[lag] > acf[lag - 1]
                && acf[lag] >= acf[lag + 1]
                && acf[lag] > best_acf
            {
                best_acf = acf[lag];
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            return None;
        }

        let period = best_lag as TimePoint * window.bucket_length;
        // Snap near-calendar periods onto the calendar.
        let period = snap_period(period, window.bucket_length);
        if modelled.iter().any(|component| {
            (component.time.period() - period).abs() <= window.bucket_length
        }) {
            return None;
        }

        let lag = (period / window.bucket_length).max(1) as usize;
        let mut profile = vec![MeanAccumulator::new(); lag];
        for (index, value) in window.values.iter().enumerate() {
            if value.count() > 0.0 {
                let offset = (window.start_time
                    + index as TimePoint * window.bucket_length)
                    .rem_euclid(period)
                    / window.bucket_length;
                profile[(offset as usize).min(lag - 1)].add(value.mean() - mean, value.count());
            }
        }
        let profile_mean = overall_mean(&profile);
        let initial_values: Vec<MeanAccumulator> = profile
            .iter()
            .map(|value| {
                if value.count() > 0.0 {
                    MeanAccumulator::from_parts(value.count(), value.mean() - profile_mean)
                } else {
                    MeanAccumulator::new()
                }
            })
            .collect();

        // An autocorrelation peak alone is not proof: level shifts and
        // other non-periodic structure also correlate at long lags. Only
        // accept the period if its repeating profile actually explains the
        // window.
        let mut sse_before = 0.0;
        let mut sse_after = 0.0;
        for (index, value) in window.values.iter().enumerate() {
            if value.count() > 0.0 {
                let time = window.start_time + index as TimePoint * window.bucket_length;
                let offset = (time.rem_euclid(period) / window.bucket_length) as usize;
                let centred = value.mean() - mean;
                let explained = initial_values[offset.min(lag - 1)].mean();
                sse_before += value.count() * centred * centred;
                sse_after += value.count() * (centred - explained) * (centred - explained);
            }
        }
        if sse_after > (1.0 - MINIMUM_EXPLAINED_VARIANCE) * sse_before {
            return None;
        }

        // The trend keeps what the seasonal profile does not explain.
        let seasonal_at = |time: TimePoint| -> f64 {
            let offset = (time.rem_euclid(period) / window.bucket_length) as usize;
            let bucket = &initial_values[offset.min(lag - 1)];
            if bucket.count() > 0.0 {
                bucket.mean()
            } else {
                0.0
            }
        };
        let trend_values: Vec<MeanAccumulator> = window
            .values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                if value.count() > 0.0 {
                    let time = window.start_time + index as TimePoint * window.bucket_length;
                    MeanAccumulator::from_parts(value.count(), value.mean() - seasonal_at(time))
                } else {
                    MeanAccumulator::new()
                }
            })
            .collect();

        Some(SeasonalDecomposition {
            seasonal: vec![SeasonalComponentProposal {
                time: SeasonalTime::periodic(period),
                initial_values,
                annotation: format!(
                    "Detected seasonality with period {}",
                    format_period(period)
                ),
            }],
            seasonal_to_remove_mask: vec![false; modelled.len()],
            trend: TrendProposal {
                initial_values: trend_values,
                start_time: window.start_time,
                end_time: window.start_time + n as TimePoint * window.bucket_length,
                bucket_length: window.bucket_length,
            },
            within_bucket_variance: window.within_bucket_variance,
        })
    }

    fn test_weekend_partition(
        &self,
        window: &WindowView,
        params: &SearchParams,
        modelled: &[ModelledSeasonality],
        mean: f64,
    ) -> Option<SeasonalDecomposition> {
        let populated_span = window.values.iter().filter(|value| value.count() > 0.0).count()
            as TimePoint
            * window.bucket_length;
        if window.bucket_length > 6 * HOUR
            || populated_span < 2 * WEEK
            || params.maximum_components < 2
            || modelled.iter().any(|component| component.time.is_windowed())
        {
            return None;
        }

        let in_weekend = |time: TimePoint| {
            let offset = time.rem_euclid(WEEK);
            (WEEKEND_START..WEEKEND_END).contains(&offset)
        };

        let mut weekday = MeanAccumulator::new();
        let mut weekend = MeanAccumulator::new();
        let mut weekday_square = MeanAccumulator::new();
        let mut weekend_square = MeanAccumulator::new();
        for (index, value) in window.values.iter().enumerate() {
            if value.count() == 0.0 {
                continue;
            }
            let time = window.start_time + index as TimePoint * window.bucket_length;
            if in_weekend(time) {
                weekend.add(value.mean(), value.count());
                weekend_square.add(value.mean() * value.mean(), value.count());
            } else {
                weekday.add(value.mean(), value.count());
                weekday_square.add(value.mean() * value.mean(), value.count());
            }
        }
        if weekday.count() < 10.0 || weekend.count() < 10.0 {
            return None;
        }
        let variance = |moments: &MeanAccumulator, squares: &MeanAccumulator| {
            (squares.mean() - moments.mean() * moments.mean()).max(0.0)
        };
        let separation = (weekday.mean() - weekend.mean()).abs();
        let uncertainty = (variance(&weekday, &weekday_square) / weekday.count()
            + variance(&weekend, &weekend_square) / weekend.count())
        .sqrt();
        if separation < 6.0 * uncertainty || separation == 0.0 {
            return None;
        }

        // Daily profiles per partition, spanning one week at the window's
        // resolution.
        let buckets_per_week = (WEEK / window.bucket_length) as usize;
        let mut profile = vec![MeanAccumulator::new(); buckets_per_week];
        for (index, value) in window.values.iter().enumerate() {
            if value.count() > 0.0 {
                let time = window.start_time + index as TimePoint * window.bucket_length;
                let offset = (time.rem_euclid(WEEK) / window.bucket_length) as usize;
                profile[offset.min(buckets_per_week - 1)]
                    .add(value.mean() - mean, value.count());
            }
        }

        let weekday_time = SeasonalTime::windowed(DAY, 4 * DAY, 9 * DAY, WEEK);
        let weekend_time = SeasonalTime::windowed(DAY, WEEKEND_START, WEEKEND_END, WEEK);
        let partition_values = |time: &SeasonalTime| -> Vec<MeanAccumulator> {
            profile
                .iter()
                .enumerate()
                .map(|(offset, value)| {
                    let bucket_time = offset as TimePoint * window.bucket_length;
                    if value.count() > 0.0 && time.in_window(bucket_time) {
                        *value
                    } else {
                        MeanAccumulator::new()
                    }
                })
                .collect()
        };

        let trend_values: Vec<MeanAccumulator> = window
            .values
            .iter()
            .map(|value| {
                if value.count() > 0.0 {
                    MeanAccumulator::from_parts(value.count(), mean)
                } else {
                    MeanAccumulator::new()
                }
            })
            .collect();

        Some(SeasonalDecomposition {
            seasonal: vec![
                SeasonalComponentProposal {
                    time: weekday_time,
                    initial_values: partition_values(&weekday_time),
                    annotation: "Detected daily seasonality on weekdays".to_string(),
                },
                SeasonalComponentProposal {
                    time: weekend_time,
                    initial_values: partition_values(&weekend_time),
                    annotation: "Detected daily seasonality on weekends".to_string(),
                },
            ],
            seasonal_to_remove_mask: modelled
                .iter()
                .map(|component| component.testable)
                .collect(),
            trend: TrendProposal {
                initial_values: trend_values,
                start_time: window.start_time,
                end_time: window.start_time
                    + window.values.len() as TimePoint * window.bucket_length,
                bucket_length: window.bucket_length,
            },
            within_bucket_variance: window.within_bucket_variance,
        })
    }
}

fn overall_mean(values: &[MeanAccumulator]) -> f64 {
    let mut mean = MeanAccumulator::new();
    for value in values {
        mean.merge(value);
    }
    mean.mean()
}

/// Snap a detected period onto a neighbouring calendar period when within
/// one bucket of it.
fn snap_period(period: TimePoint, bucket_length: TimePoint) -> TimePoint {
    for calendar in [MINUTE, HOUR, DAY, WEEK] {
        if (period - calendar).abs() <= bucket_length {
            return calendar;
        }
    }
    period
}

fn format_period(period: TimePoint) -> String {
    if period % WEEK == 0 {
        format!("{}w", period / WEEK)
    } else if period % DAY == 0 {
        format!("{}d", period / DAY)
    } else if period % HOUR == 0 {
        format!("{}h", period / HOUR)
    } else if period % MINUTE == 0 {
        format!("{}m", period / MINUTE)
    } else {
        format!("{period}s")
    }
}
