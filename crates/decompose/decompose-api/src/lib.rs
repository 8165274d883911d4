//! Decomposition API
//!
//! Configuration types for the online time-series decomposition.

use serde::{Deserialize, Serialize};

use decompose_spi::TimePoint;

// Re-export SPI types
pub use decompose_spi::{DecomposeError, Result};

/// Hard cap on seasonal plus calendar components.
pub const MAX_COMPONENTS: usize = 8;

/// Decomposition configuration.
///
/// Immutable after construction except for the decay rate, which can be
/// adjusted on a live decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Ageing applied per day of elapsed time, as a rate. Larger forgets
    /// faster.
    pub decay_rate: f64,
    /// The uniform bucket length of the stream, in seconds.
    pub bucket_length: TimePoint,
    /// Buckets per seasonal period. Calendar components use a third of
    /// this.
    pub seasonal_component_size: usize,
    /// Maximum seasonal plus calendar components.
    pub max_components: usize,
    /// Seed for the decomposition's private PRNG so identical input
    /// streams produce identical output.
    pub rng_seed: u64,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.012,
            bucket_length: 300,
            seasonal_component_size: 36,
            max_components: MAX_COMPONENTS,
            rng_seed: 0,
        }
    }
}

impl DecompositionConfig {
    pub fn new(decay_rate: f64, bucket_length: TimePoint) -> Self {
        Self { decay_rate, bucket_length, ..Self::default() }
    }

    pub fn with_seasonal_component_size(mut self, size: usize) -> Self {
        self.seasonal_component_size = size;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Buckets per calendar component.
    pub fn calendar_component_size(&self) -> usize {
        self.seasonal_component_size / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecompositionConfig::default();
        assert_eq!(config.max_components, 8);
        assert_eq!(config.calendar_component_size(), 12);
    }

    #[test]
    fn test_builders() {
        let config = DecompositionConfig::new(0.024, 3600)
            .with_seasonal_component_size(48)
            .with_rng_seed(17);
        assert_eq!(config.bucket_length, 3600);
        assert_eq!(config.seasonal_component_size, 48);
        assert_eq!(config.calendar_component_size(), 16);
        assert_eq!(config.rng_seed, 17);
    }
}
