//! Decompose Facade
//!
//! High-level API for the online time-series decomposition. Re-exports the
//! public types from the decompose stack for convenient usage.

// Re-export the engine types
pub use decompose_core::{
    AutocorrelationSearch, BucketedPeriodicFunction, CalendarComponent, CalendarCyclicTest,
    ChangePoint, ChangePointKind, ChangePointTest, Checksummer, ComponentStore,
    DecompositionBuilder, ExpandingWindow, GainController, SeasonalComponent, SeasonalityTest,
    TimeSeriesDecomposition, TrendComponent,
};

// Re-export configuration
pub use decompose_api::{DecompositionConfig, MAX_COMPONENTS};

// Re-export SPI contracts and model types
pub use decompose_spi::{
    AnnotationCallback, CalendarFeature, ComponentChangeCallback, DecomposeError, DocumentReader,
    DocumentWriter, MeanAccumulator, MeanVarAccumulator, MemoryCircuitBreaker,
    ModelledSeasonality, NoSeasonalitySearch, Observation, ObservationWeights, PredictInterval,
    Result, SearchParams, SeasonalComponentProposal, SeasonalDecomposition, SeasonalTime,
    SeasonalitySearch, StateDocument, TimePoint, TrendProposal, UnlimitedMemory, WindowView, DAY,
    HOUR, MINUTE, MONTH, WEEK,
};
