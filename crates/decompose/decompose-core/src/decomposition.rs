//! The online time-series decomposition.
//!
//! Owns the component store and the three testers, drives the per-bucket
//! pipeline, and exposes the embedder API: predictions, detrending, decay
//! propagation, persistence, and checksums.

use decompose_api::DecompositionConfig;
use decompose_spi::{
    DecomposeError, DocumentReader, DocumentWriter, MeanAccumulator, MemoryCircuitBreaker,
    Observation, PredictInterval, Result, SeasonalitySearch, TimePoint, UnlimitedMemory,
};

use crate::calendar::CalendarComponent;
use crate::calendar_test::CalendarCyclicTest;
use crate::change_point::ChangePointTest;
use crate::checksum::Checksummer;
use crate::components::{ComponentStore, StoreCallbacks};
use crate::mediator::{AddValueContext, Message};
use crate::search::AutocorrelationSearch;
use crate::seasonal::SeasonalComponent;
use crate::seasonality_test::SeasonalityTest;
use crate::stats::normal_quantile_two_sided;

const TIME_SENTINEL: TimePoint = TimePoint::MIN / 2;

/// Builds a decomposition with its injected collaborators.
pub struct DecompositionBuilder {
    config: DecompositionConfig,
    search: Box<dyn SeasonalitySearch>,
    breaker: Box<dyn MemoryCircuitBreaker>,
    on_component_change: Box<dyn FnMut(Vec<MeanAccumulator>)>,
    on_annotation: Box<dyn FnMut(&str)>,
}

impl DecompositionBuilder {
    pub fn new(config: DecompositionConfig) -> Self {
        Self {
            config,
            search: Box::new(AutocorrelationSearch::new()),
            breaker: Box::new(UnlimitedMemory),
            on_component_change: Box::new(|_| {}),
            on_annotation: Box::new(|_| {}),
        }
    }

    /// Replace the default seasonality hypothesis search.
    pub fn with_search(mut self, search: impl SeasonalitySearch + 'static) -> Self {
        self.search = Box::new(search);
        self
    }

    pub fn with_memory_circuit_breaker(
        mut self,
        breaker: impl MemoryCircuitBreaker + 'static,
    ) -> Self {
        self.breaker = Box::new(breaker);
        self
    }

    /// Fired whenever the component set changes and downstream residual
    /// models must be rebuilt.
    pub fn on_component_change(
        mut self,
        callback: impl FnMut(Vec<MeanAccumulator>) + 'static,
    ) -> Self {
        self.on_component_change = Box::new(callback);
        self
    }

    /// Fired with user-visible model annotations.
    pub fn on_annotation(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.on_annotation = Box::new(callback);
        self
    }

    pub fn build(self) -> TimeSeriesDecomposition {
        let config = self.config;
        TimeSeriesDecomposition {
            components: ComponentStore::new(
                config.decay_rate,
                config.bucket_length,
                config.seasonal_component_size,
                config.max_components,
            ),
            change_point_test: ChangePointTest::new(config.decay_rate, config.bucket_length),
            seasonality_test: SeasonalityTest::new(config.decay_rate, config.bucket_length),
            calendar_test: CalendarCyclicTest::new(config.decay_rate, config.bucket_length),
            search: self.search,
            breaker: self.breaker,
            on_component_change: self.on_component_change,
            on_annotation: self.on_annotation,
            last_value_time: TIME_SENTINEL,
            last_propagation_time: TIME_SENTINEL,
            time_shift: 0,
            config,
        }
    }
}

pub struct TimeSeriesDecomposition {
    config: DecompositionConfig,
    components: ComponentStore,
    change_point_test: ChangePointTest,
    seasonality_test: SeasonalityTest,
    calendar_test: CalendarCyclicTest,
    search: Box<dyn SeasonalitySearch>,
    breaker: Box<dyn MemoryCircuitBreaker>,
    on_component_change: Box<dyn FnMut(Vec<MeanAccumulator>)>,
    on_annotation: Box<dyn FnMut(&str)>,
    last_value_time: TimePoint,
    last_propagation_time: TimePoint,
    time_shift: TimePoint,
}

impl TimeSeriesDecomposition {
    pub fn new(config: DecompositionConfig) -> Self {
        DecompositionBuilder::new(config).build()
    }

    pub fn builder(config: DecompositionConfig) -> DecompositionBuilder {
        DecompositionBuilder::new(config)
    }

    /// Feed one bucketed observation through the whole pipeline.
    pub fn add_point(&mut self, observation: Observation) {
        let time = observation.time;
        self.propagate_forwards_to(time);

        let last_time = if self.last_value_time == TIME_SENTINEL {
            time - self.config.bucket_length
        } else {
            self.last_value_time
        };
        let mut weights = observation.weights;
        weights.update *= self.change_point_test.count_weight(time);

        let ctx = AddValueContext {
            time,
            last_time,
            time_shift: observation.time_shift + self.time_shift,
            value: observation.value,
            weights,
            occupancy: observation.occupancy,
            first_value_time: observation.first_value_time,
            trend_prediction: self.components.trend_prediction(time),
            seasonal_prediction: self.components.seasonal_prediction(time),
            calendar_prediction: self.components.calendar_prediction(time),
        };

        // Subsystems run in a fixed order; each detection they emit is
        // applied depth-first before the next subsystem runs.
        let messages = {
            let mut callbacks = StoreCallbacks {
                component_change: &mut *self.on_component_change,
                annotation: &mut *self.on_annotation,
            };
            self.components.handle_add_value(&ctx, &mut callbacks)
        };
        self.dispatch_all(messages);

        let messages = self.change_point_test.handle_add_value(
            &ctx,
            &self.components,
            self.config.rng_seed,
        );
        self.dispatch_all(messages);

        let messages = self.seasonality_test.handle_add_value(
            &ctx,
            &self.components,
            self.search.as_ref(),
            self.breaker.as_ref(),
        );
        self.dispatch_all(messages);

        let messages = self.calendar_test.handle_add_value(&ctx, self.breaker.as_ref());
        self.dispatch_all(messages);

        self.last_value_time = time;
    }

    fn dispatch_all(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::DetectedSeasonal { time, decomposition } => {
                let mut callbacks = StoreCallbacks {
                    component_change: &mut *self.on_component_change,
                    annotation: &mut *self.on_annotation,
                };
                self.components.handle_detected_seasonal(
                    time,
                    &decomposition,
                    self.breaker.as_ref(),
                    &mut callbacks,
                    self.config.rng_seed,
                );
                self.change_point_test.handle_detected_seasonal(time);
                self.calendar_test.handle_detected_seasonal(time);
            }
            Message::DetectedCalendar { time, feature, time_zone_offset } => {
                let mut callbacks = StoreCallbacks {
                    component_change: &mut *self.on_component_change,
                    annotation: &mut *self.on_annotation,
                };
                self.components.handle_detected_calendar(
                    time,
                    feature,
                    time_zone_offset,
                    self.breaker.as_ref(),
                    &mut callbacks,
                );
            }
            Message::DetectedTrend => {
                let components = &self.components;
                let residuals = self
                    .seasonality_test
                    .residuals(&mut |time| components.prediction(time), self.config.rng_seed);
                (self.on_component_change)(residuals);
            }
            Message::DetectedChangePoint { time, change } => {
                let mut callbacks = StoreCallbacks {
                    component_change: &mut *self.on_component_change,
                    annotation: &mut *self.on_annotation,
                };
                self.components.apply_change_point(time, &change, &mut callbacks);
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Predicted `(mean, interval)` at `time` for a two-sided confidence in
    /// [0, 1).
    pub fn predict(&self, time: TimePoint, confidence: f64) -> PredictInterval {
        let (mean, variance) = self.components.value(time);
        if confidence <= 0.0 || variance <= 0.0 {
            return PredictInterval::point(mean);
        }
        let bound = normal_quantile_two_sided(confidence) * variance.sqrt();
        PredictInterval::new(mean, mean - bound, mean + bound)
    }

    /// The value with the decomposition removed.
    pub fn detrend(&self, time: TimePoint, value: f64, confidence: f64) -> f64 {
        let interval = self.predict(time, confidence);
        if confidence > 0.0 {
            value - interval.clamp(value)
        } else {
            value - interval.mean
        }
    }

    pub fn seasonal_components(&self) -> &[SeasonalComponent] {
        self.components.seasonal_components()
    }

    pub fn calendar_components(&self) -> &[CalendarComponent] {
        self.components.calendar_components()
    }

    pub fn using_trend_for_prediction(&self) -> bool {
        self.components.using_trend_for_prediction()
    }

    pub fn initialized(&self) -> bool {
        self.components.initialized()
    }

    pub fn mean_value(&self, time: TimePoint) -> f64 {
        self.components.mean_value(time)
    }

    pub fn mean_variance(&self) -> f64 {
        self.components.mean_variance()
    }

    /// The adjusted count weight upstream models should apply at `time`.
    pub fn count_weight(&self, time: TimePoint) -> f64 {
        self.change_point_test.count_weight(time)
    }

    /// How much outlier down-weighting should be relaxed for an error of
    /// the given size at `time`.
    pub fn outlier_weight_derate(&self, time: TimePoint, error: f64) -> f64 {
        self.change_point_test.outlier_weight_derate(time, error)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Age all state to `time`.
    pub fn propagate_forwards_to(&mut self, time: TimePoint) {
        if self.last_propagation_time == TIME_SENTINEL {
            self.last_propagation_time = time;
            return;
        }
        if time <= self.last_propagation_time {
            return;
        }
        let start = self.last_propagation_time;
        self.components.propagate_forwards(start, time);
        self.change_point_test.propagate_forwards(start, time);
        self.seasonality_test.propagate_forwards(start, time);
        self.calendar_test.propagate_forwards(start, time);
        self.last_propagation_time = time;
    }

    /// Shift the time axis of the seasonality test windows.
    pub fn shift_time(&mut self, time: TimePoint, shift: TimePoint) {
        self.seasonality_test.shift_time(time, shift);
        self.time_shift += shift;
    }

    pub fn decay_rate(&self) -> f64 {
        self.config.decay_rate
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.config.decay_rate = decay_rate;
        self.components.set_decay_rate(decay_rate);
        self.change_point_test.set_decay_rate(decay_rate);
        self.seasonality_test.set_decay_rate(decay_rate);
        self.calendar_test.set_decay_rate(decay_rate);
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.components.memory_usage()
            + self.change_point_test.memory_usage()
            + self.seasonality_test.memory_usage()
            + self.calendar_test.memory_usage()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Stable hash of all state; equal across persist/restore round trips.
    pub fn checksum(&self) -> u64 {
        let mut ck = Checksummer::new();
        ck.f64(self.config.decay_rate)
            .i64(self.config.bucket_length)
            .usize(self.config.seasonal_component_size)
            .i64(self.last_value_time)
            .i64(self.last_propagation_time)
            .i64(self.time_shift);
        self.components.checksum(&mut ck);
        self.change_point_test.checksum(&mut ck);
        self.seasonality_test.checksum(&mut ck);
        self.calendar_test.checksum(&mut ck);
        ck.finish()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("last_value_time", self.last_value_time);
        writer.field("last_propagation_time", self.last_propagation_time);
        writer.field("time_shift", self.time_shift);
        writer.level("components", |w| self.components.persist(w));
        writer.level("change_point_test", |w| self.change_point_test.persist(w));
        writer.level("seasonality_test", |w| self.seasonality_test.persist(w));
        writer.level("calendar_test", |w| self.calendar_test.persist(w));
    }

    /// Restore state persisted by `persist`. The seasonality test silently
    /// restarts from fresh windows when its persisted version is unknown;
    /// anything else unknown fails the restore.
    pub fn restore(&mut self, reader: &DocumentReader) -> Result<()> {
        self.last_value_time = reader
            .parse("last_value_time")
            .ok_or_else(|| DecomposeError::RestoreFailed("missing last_value_time".into()))?;
        self.last_propagation_time = reader.parse("last_propagation_time").ok_or_else(|| {
            DecomposeError::RestoreFailed("missing last_propagation_time".into())
        })?;
        self.time_shift = reader
            .parse("time_shift")
            .ok_or_else(|| DecomposeError::RestoreFailed("missing time_shift".into()))?;

        let components = reader
            .level("components")
            .ok_or_else(|| DecomposeError::RestoreFailed("missing components".into()))?;
        if !self.components.restore(&components) {
            return Err(DecomposeError::RestoreFailed(
                "unsupported components state".into(),
            ));
        }
        let change_point = reader
            .level("change_point_test")
            .ok_or_else(|| DecomposeError::RestoreFailed("missing change point test".into()))?;
        if !self.change_point_test.restore(&change_point) {
            return Err(DecomposeError::RestoreFailed(
                "unsupported change point test state".into(),
            ));
        }
        if let Some(level) = reader.level("seasonality_test") {
            self.seasonality_test.restore(&level);
        }
        let calendar = reader
            .level("calendar_test")
            .ok_or_else(|| DecomposeError::RestoreFailed("missing calendar test".into()))?;
        if !self.calendar_test.restore(&calendar) {
            return Err(DecomposeError::RestoreFailed(
                "unsupported calendar test state".into(),
            ));
        }
        Ok(())
    }
}
