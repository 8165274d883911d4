//! Model types shared across the decomposition stack.

mod accumulator;
mod calendar_feature;
mod document;
mod observation;
mod prediction;
mod proposal;
mod seasonal_time;
mod time;

pub use accumulator::{MeanAccumulator, MeanVarAccumulator};
pub use calendar_feature::CalendarFeature;
pub use document::{DocumentReader, DocumentWriter, StateDocument};
pub use observation::{Observation, ObservationWeights};
pub use prediction::PredictInterval;
pub use proposal::{SeasonalComponentProposal, SeasonalDecomposition, TrendProposal};
pub use seasonal_time::SeasonalTime;
pub use time::{ceil_to, floor_to, TimePoint, DAY, HOUR, MINUTE, MONTH, WEEK};
