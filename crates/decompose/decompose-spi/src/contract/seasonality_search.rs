//! Seasonality hypothesis search contract.
//!
//! The concrete search algorithm is an external collaborator. The
//! decomposition hands it a preconditioned view of an expanding test window
//! plus the currently modelled seasonalities, and receives back a
//! `SeasonalDecomposition` proposal when the modelled set should change.

use crate::model::{MeanAccumulator, SeasonalDecomposition, SeasonalTime, TimePoint};

/// A snapshot of one expanding window prepared for testing.
///
/// The values have already been preconditioned: predictions of modelled
/// components that are testable at this window's resolution have been
/// subtracted, so the search sees only unexplained signal plus the
/// components it is allowed to re-model.
#[derive(Debug, Clone)]
pub struct WindowView {
    pub values: Vec<MeanAccumulator>,
    /// Time of the first sample in the first bucket.
    pub start_time: TimePoint,
    /// Start of the first window bucket.
    pub bucket_start_time: TimePoint,
    /// Current window bucket length.
    pub bucket_length: TimePoint,
    /// The job bucket length.
    pub job_bucket_length: TimePoint,
    /// Variance lost to averaging within window buckets.
    pub within_bucket_variance: f64,
}

impl WindowView {
    /// Total time spanned by the window.
    pub fn length(&self) -> TimePoint {
        self.values.len() as TimePoint * self.bucket_length
    }
}

/// A currently modelled seasonality, as seen by the search.
#[derive(Debug, Clone)]
pub struct ModelledSeasonality {
    pub time: SeasonalTime,
    /// Whether the window resolution is fine enough to re-test this
    /// component; untestable components were left in the window values.
    pub testable: bool,
    /// Component memory footprint in buckets.
    pub size: usize,
}

/// Search parameters chosen per window by the seasonality test.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Shortest period worth proposing from this window.
    pub minimum_period: TimePoint,
    /// Minimum buckets-per-period needed to re-test a modelled component.
    pub minimum_resolution: usize,
    /// Fraction of buckets containing data.
    pub occupancy: f64,
    /// Remaining component budget (modelled components already deducted).
    pub maximum_components: usize,
}

/// The external seasonality hypothesis search.
pub trait SeasonalitySearch {
    /// Decompose the window; `None` or an unchanged proposal means the
    /// modelled set stands.
    fn decompose(
        &self,
        window: &WindowView,
        params: &SearchParams,
        modelled: &[ModelledSeasonality],
    ) -> Option<SeasonalDecomposition>;
}

/// A search that never proposes anything; disables seasonality detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSeasonalitySearch;

impl SeasonalitySearch for NoSeasonalitySearch {
    fn decompose(
        &self,
        _window: &WindowView,
        _params: &SearchParams,
        _modelled: &[ModelledSeasonality],
    ) -> Option<SeasonalDecomposition> {
        None
    }
}
