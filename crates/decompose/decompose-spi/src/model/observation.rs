//! Bucketed observation delivered to the decomposition.

use serde::{Deserialize, Serialize};

use super::time::TimePoint;

/// Sample weights attached to an observation.
///
/// The count weight says how much the observation counts as one sample; the
/// update weight is the same after upstream outlier handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObservationWeights {
    pub count: f64,
    pub update: f64,
}

impl Default for ObservationWeights {
    fn default() -> Self {
        Self { count: 1.0, update: 1.0 }
    }
}

impl ObservationWeights {
    pub fn new(count: f64, update: f64) -> Self {
        Self { count, update }
    }
}

/// One bucketed observation of the metric stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Observation {
    pub time: TimePoint,
    pub value: f64,
    pub weights: ObservationWeights,
    /// Empirical fraction of buckets containing data, in (0, 1]. Widens
    /// timing tolerances when data is sparse.
    pub occupancy: f64,
    pub first_value_time: TimePoint,
    pub time_shift: TimePoint,
}

impl Observation {
    pub fn new(time: TimePoint, value: f64) -> Self {
        Self {
            time,
            value,
            weights: ObservationWeights::default(),
            occupancy: 1.0,
            first_value_time: time,
            time_shift: 0,
        }
    }

    pub fn with_weights(mut self, weights: ObservationWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_occupancy(mut self, occupancy: f64) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn with_first_value_time(mut self, time: TimePoint) -> Self {
        self.first_value_time = time;
        self
    }

    pub fn with_time_shift(mut self, shift: TimePoint) -> Self {
        self.time_shift = shift;
        self
    }
}
