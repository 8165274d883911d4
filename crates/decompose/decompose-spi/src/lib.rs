//! Decomposition Service Provider Interface
//!
//! Defines the contracts, errors, and model types shared across the online
//! time-series decomposition stack.

pub mod contract;
pub mod error;
pub mod model;

// Re-export all public items at crate root for convenience
pub use contract::{
    AnnotationCallback, ComponentChangeCallback, MemoryCircuitBreaker, ModelledSeasonality,
    NoSeasonalitySearch, SearchParams, SeasonalitySearch, UnlimitedMemory, WindowView,
};
pub use error::{DecomposeError, Result};
pub use model::{
    ceil_to, floor_to, CalendarFeature, DocumentReader, DocumentWriter, MeanAccumulator,
    MeanVarAccumulator, Observation, ObservationWeights, PredictInterval,
    SeasonalComponentProposal, SeasonalDecomposition, SeasonalTime, StateDocument, TimePoint,
    TrendProposal, DAY, HOUR, MINUTE, MONTH, WEEK,
};
