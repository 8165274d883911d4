//! Decomposition Core
//!
//! Online additive decomposition of a metric stream into trend, seasonal,
//! and calendar components:
//!
//! ```text
//! value(t) = trend(t) + sum seasonal_i(t) + sum calendar_j(t) + residual(t)
//! ```
//!
//! The decomposition evolves as observations arrive: a change-point test
//! watches the residual stream for level shifts, scale changes, and trend
//! onsets; a seasonality test accumulates expanding windows and invokes an
//! external hypothesis search; a calendar test looks for recurring civil
//! features such as "last Friday of month". The component store owns the
//! fitted state and distributes each observation's error across components
//! under gain control.

mod bucketed;
mod calendar;
mod change_point;
mod checksum;
mod components;
mod decomposition;
mod error_stats;
mod expanding_window;
mod gain;
mod mediator;
mod regression;
mod search;
mod seasonal;
mod seasonality_test;
mod stats;
mod trend;

pub use bucketed::BucketedPeriodicFunction;
pub use calendar::CalendarComponent;
pub use calendar_test::CalendarCyclicTest;
pub use change_point::{ChangePoint, ChangePointKind, ChangePointTest};
pub use checksum::Checksummer;
pub use components::ComponentStore;
pub use decomposition::{DecompositionBuilder, TimeSeriesDecomposition};
pub use expanding_window::ExpandingWindow;
pub use gain::GainController;
pub use search::AutocorrelationSearch;
pub use seasonal::SeasonalComponent;
pub use seasonality_test::SeasonalityTest;
pub use trend::TrendComponent;
