//! Typed messages exchanged between the testers and the component store.
//!
//! The decomposition owns all four subsystems as sibling fields and fans
//! messages out synchronously, depth-first: everything a handler emits is
//! fully dispatched before the next handler sees the triggering message.
//! This renders the original mediator-with-back-pointers design without
//! aliased mutable references.

use decompose_spi::{
    CalendarFeature, ObservationWeights, SeasonalDecomposition, TimePoint,
};

use crate::change_point::ChangePoint;

/// The per-observation context delivered to every subsystem.
#[derive(Debug, Clone, Copy)]
pub struct AddValueContext {
    pub time: TimePoint,
    pub last_time: TimePoint,
    pub time_shift: TimePoint,
    pub value: f64,
    pub weights: ObservationWeights,
    pub occupancy: f64,
    pub first_value_time: TimePoint,
    /// Trend contribution to the current prediction (zero until the trend
    /// is used for prediction).
    pub trend_prediction: f64,
    pub seasonal_prediction: f64,
    pub calendar_prediction: f64,
}

impl AddValueContext {
    pub fn prediction(&self) -> f64 {
        self.trend_prediction + self.seasonal_prediction + self.calendar_prediction
    }
}

/// Detection messages emitted by the testers.
#[derive(Debug)]
pub enum Message {
    DetectedSeasonal {
        time: TimePoint,
        decomposition: SeasonalDecomposition,
    },
    DetectedCalendar {
        time: TimePoint,
        feature: CalendarFeature,
        time_zone_offset: TimePoint,
    },
    DetectedTrend,
    DetectedChangePoint {
        time: TimePoint,
        change: ChangePoint,
    },
}
