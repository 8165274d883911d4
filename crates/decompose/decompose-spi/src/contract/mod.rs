//! Contracts implemented by embedders and external collaborators.

mod callbacks;
mod memory_circuit_breaker;
mod seasonality_search;

pub use callbacks::{AnnotationCallback, ComponentChangeCallback};
pub use memory_circuit_breaker::{MemoryCircuitBreaker, UnlimitedMemory};
pub use seasonality_search::{
    ModelledSeasonality, NoSeasonalitySearch, SearchParams, SeasonalitySearch, WindowView,
};
