//! Seasonal decomposition proposals.
//!
//! The seasonality hypothesis search is an external collaborator; its
//! output is a proposal describing which modelled components to remove,
//! which new components to create, and the trend refit data retained by the
//! test window.

use serde::{Deserialize, Serialize};

use super::accumulator::MeanAccumulator;
use super::seasonal_time::SeasonalTime;
use super::time::TimePoint;

/// A new seasonal component to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalComponentProposal {
    pub time: SeasonalTime,
    /// Bucketed values of one period used to initialize the component.
    pub initial_values: Vec<MeanAccumulator>,
    /// User-visible note, e.g. "Detected seasonality with period 1d".
    pub annotation: String,
}

/// Trend refit data covering the window retained by the test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendProposal {
    pub initial_values: Vec<MeanAccumulator>,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub bucket_length: TimePoint,
}

/// The full output of a seasonality test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalDecomposition {
    /// New components to create, shortest period first.
    pub seasonal: Vec<SeasonalComponentProposal>,
    /// Mask over the currently modelled seasonal components; `true` marks a
    /// component the proposal removes. Must match the modelled count.
    pub seasonal_to_remove_mask: Vec<bool>,
    pub trend: TrendProposal,
    /// Variance lost to averaging within window buckets, used to re-noise
    /// residuals handed to downstream models.
    pub within_bucket_variance: f64,
}

impl SeasonalDecomposition {
    /// Whether applying this proposal changes the modelled components.
    pub fn components_changed(&self) -> bool {
        !self.seasonal.is_empty() || self.seasonal_to_remove_mask.iter().any(|&remove| remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::DAY;

    fn empty_trend() -> TrendProposal {
        TrendProposal { initial_values: Vec::new(), start_time: 0, end_time: 0, bucket_length: DAY }
    }

    #[test]
    fn test_components_changed() {
        let unchanged = SeasonalDecomposition {
            seasonal: Vec::new(),
            seasonal_to_remove_mask: vec![false, false],
            trend: empty_trend(),
            within_bucket_variance: 0.0,
        };
        assert!(!unchanged.components_changed());

        let removal_only = SeasonalDecomposition {
            seasonal: Vec::new(),
            seasonal_to_remove_mask: vec![true],
            trend: empty_trend(),
            within_bucket_variance: 0.0,
        };
        assert!(removal_only.components_changed());

        let addition = SeasonalDecomposition {
            seasonal: vec![SeasonalComponentProposal {
                time: SeasonalTime::periodic(DAY),
                initial_values: Vec::new(),
                annotation: String::new(),
            }],
            seasonal_to_remove_mask: Vec::new(),
            trend: empty_trend(),
            within_bucket_variance: 0.0,
        };
        assert!(addition.components_changed());
    }
}
