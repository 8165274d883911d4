//! The component store.
//!
//! Owns the fitted decomposition state, applies each observation to the
//! trend and the active seasonal and calendar components, and reacts to
//! detection messages by inserting or removing components, refitting the
//! trend, and notifying downstream residual models.

mod calendar_set;
mod seasonal_set;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, error, trace};

use decompose_spi::{
    DocumentReader, DocumentWriter, MeanAccumulator, MeanVarAccumulator, MemoryCircuitBreaker,
    SeasonalDecomposition, TimePoint, DAY,
};

use crate::calendar::CalendarComponent;
use crate::change_point::{ChangePoint, ChangePointKind};
use crate::checksum::Checksummer;
use crate::gain::GainController;
use crate::mediator::{AddValueContext, Message};
use crate::seasonal::SeasonalComponent;
use crate::stats::{self, age_factor_daily, left_tail_f_test, logistic, MinMaxAccumulator};
use crate::trend::TrendComponent;

pub use calendar_set::CalendarSet;
pub use seasonal_set::SeasonalSet;

/// Threshold on the logistic blend above which the trend is used for
/// prediction.
const USE_TREND_THRESHOLD: f64 = 0.25;
/// Initial count weight for not-yet-interpolated seasonal components;
/// down-weighted to avoid overfitting the first period.
const SEASONAL_INITIAL_WEIGHT: f64 = 0.5;

/// Callbacks threaded through message handling.
pub struct StoreCallbacks<'a> {
    pub component_change: &'a mut dyn FnMut(Vec<MeanAccumulator>),
    pub annotation: &'a mut dyn FnMut(&str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    NewComponents,
    Normal,
    Disabled,
    Error,
}

impl StoreState {
    fn name(self) -> &'static str {
        match self {
            StoreState::NewComponents => "NEW_COMPONENTS",
            StoreState::Normal => "NORMAL",
            StoreState::Disabled => "DISABLED",
            StoreState::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StoreSymbol {
    AddedComponents,
    Interpolated,
    Reset,
}

/// Mean-zero Gaussian noise compensating for variance lost to averaging.
///
/// A fresh generator is seeded per call so identical input streams produce
/// identical output and a restored decomposition stays in lockstep with
/// the original.
pub(crate) fn add_mean_zero_normal_noise(
    seed: u64,
    variance: f64,
    values: &mut [MeanAccumulator],
) {
    if variance <= 0.0 {
        return;
    }
    let Ok(normal) = Normal::new(0.0, variance.sqrt()) else {
        return;
    };
    let mut rng = StdRng::seed_from_u64(seed);
    for value in values {
        value.shift(normal.sample(&mut rng));
    }
}

pub struct ComponentStore {
    state: StoreState,
    decay_rate: f64,
    bucket_length: TimePoint,
    seasonal_component_size: usize,
    calendar_component_size: usize,
    max_components: usize,
    trend: TrendComponent,
    seasonal: SeasonalSet,
    calendar: CalendarSet,
    gain_controller: GainController,
    mean_variance_scale: MeanAccumulator,
    prediction_error_without_trend: MeanVarAccumulator,
    prediction_error_with_trend: MeanVarAccumulator,
    using_trend_for_prediction: bool,
}

impl ComponentStore {
    pub fn new(
        decay_rate: f64,
        bucket_length: TimePoint,
        seasonal_component_size: usize,
        max_components: usize,
    ) -> Self {
        Self {
            state: StoreState::Normal,
            decay_rate,
            bucket_length,
            seasonal_component_size,
            calendar_component_size: seasonal_component_size / 3,
            max_components,
            trend: TrendComponent::new(decay_rate),
            seasonal: SeasonalSet::new(),
            calendar: CalendarSet::new(),
            gain_controller: GainController::new(),
            mean_variance_scale: MeanAccumulator::new(),
            prediction_error_without_trend: MeanVarAccumulator::new(),
            prediction_error_with_trend: MeanVarAccumulator::new(),
            using_trend_for_prediction: false,
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn trend(&self) -> &TrendComponent {
        &self.trend
    }

    pub fn seasonal_components(&self) -> &[SeasonalComponent] {
        self.seasonal.components()
    }

    pub fn calendar_components(&self) -> &[CalendarComponent] {
        self.calendar.components()
    }

    pub fn has_seasonal(&self) -> bool {
        !self.seasonal.is_empty()
    }

    pub fn component_count(&self) -> usize {
        self.seasonal.len() + self.calendar.len()
    }

    pub fn using_trend_for_prediction(&self) -> bool {
        self.using_trend_for_prediction
    }

    pub fn seasonal_component_size(&self) -> usize {
        self.seasonal_component_size
    }

    pub fn max_components(&self) -> usize {
        self.max_components
    }

    pub fn initialized(&self) -> bool {
        (self.using_trend_for_prediction && self.trend.initialized())
            || self.seasonal.initialized_any()
            || self.calendar.initialized_any()
    }

    /// The combined prediction at `time`; the trend contributes only once
    /// it is used for prediction.
    pub fn prediction(&self, time: TimePoint) -> f64 {
        self.trend_prediction(time) + self.seasonal_prediction(time) + self.calendar_prediction(time)
    }

    /// Trend contribution to the prediction; zero until the trend is used.
    pub fn trend_prediction(&self, time: TimePoint) -> f64 {
        if self.using_trend_for_prediction {
            self.trend.value(time).0
        } else {
            0.0
        }
    }

    pub fn seasonal_prediction(&self, time: TimePoint) -> f64 {
        self.seasonal.prediction(time)
    }

    pub fn calendar_prediction(&self, time: TimePoint) -> f64 {
        self.calendar.prediction(time)
    }

    /// Combined `(mean, variance)` at `time` for the predict API.
    pub fn value(&self, time: TimePoint) -> (f64, f64) {
        let mut mean = 0.0;
        let mut variance = 0.0;
        if self.using_trend_for_prediction {
            let (trend_mean, trend_variance) = self.trend.value(time);
            mean += trend_mean;
            variance += trend_variance;
        }
        for index in self.seasonal.active_at(time) {
            let (component_mean, component_variance) = self.seasonal.value_at(index, time);
            mean += component_mean;
            variance += component_variance;
        }
        for index in self.calendar.active_at(time) {
            let (component_mean, component_variance) = self.calendar.value_at(index, time);
            mean += component_mean;
            variance += component_variance;
        }
        let scale = self.mean_variance_scale();
        (mean, scale * variance)
    }

    /// Prediction of the seasonal components selected by `mask`, used to
    /// precondition seasonality test windows.
    pub fn seasonal_masked_prediction(&self, time: TimePoint, mask: &[bool]) -> f64 {
        self.seasonal.masked_prediction(time, mask)
    }

    /// The mean of the decomposition at `time`: trend level plus the
    /// window-weighted mean of the seasonal components.
    pub fn mean_value(&self, time: TimePoint) -> f64 {
        if !self.initialized() {
            return 0.0;
        }
        let trend =
            if self.using_trend_for_prediction { self.trend.value(time).0 } else { 0.0 };
        trend + mean_of(self.seasonal.components(), |component| component.mean_value())
    }

    pub fn mean_variance(&self) -> f64 {
        if !self.initialized() {
            return 0.0;
        }
        let trend = if self.using_trend_for_prediction { self.trend.variance() } else { 0.0 };
        trend + mean_of(self.seasonal.components(), |component| component.mean_variance())
    }

    pub fn mean_variance_scale(&self) -> f64 {
        if self.mean_variance_scale.is_empty() {
            1.0
        } else {
            self.mean_variance_scale.mean()
        }
    }

    // ========================================================================
    // Message handling
    // ========================================================================

    pub fn handle_add_value(
        &mut self,
        ctx: &AddValueContext,
        callbacks: &mut StoreCallbacks,
    ) -> Vec<Message> {
        match self.state {
            StoreState::Normal | StoreState::NewComponents => {
                self.interpolate(ctx.time, callbacks);
                self.update(ctx, callbacks)
            }
            StoreState::Disabled => Vec::new(),
            StoreState::Error => {
                error!("components in a bad state");
                self.apply(StoreSymbol::Reset);
                Vec::new()
            }
        }
    }

    fn update(&mut self, ctx: &AddValueContext, callbacks: &mut StoreCallbacks) -> Vec<Message> {
        let time = ctx.time;
        let value = ctx.value;
        let weight = ctx.weights.update;
        let initial_weight = ctx.weights.count;

        let active_seasonal = self.seasonal.active_at(time);
        let active_calendar = self.calendar.active_at(time);
        let deltas = self.seasonal.deltas(time, &active_seasonal);
        let m = active_seasonal.len();
        let n = active_calendar.len();
        let total = (m + n + 1) as f64;

        // Decompose the observation across the trend and each component.
        let trend_value = self.trend.value(time).0;
        let mut component_values = Vec::with_capacity(m + n);
        let mut x_hat = trend_value;
        for &index in &active_seasonal {
            let x = self.seasonal.value_at(index, time).0;
            component_values.push(x);
            x_hat += x;
        }
        for &index in &active_calendar {
            let x = self.calendar.value_at(index, time).0;
            component_values.push(x);
            x_hat += x;
        }

        // Z controls how much of the error each component absorbs. Noise
        // still averages to zero; smaller Z is more responsive at the cost
        // of steady-state variance.
        let gain = self.gain_controller.gain();
        let z = (total / gain).max(1.0);
        let error = value - x_hat;
        let reference_error = value - trend_value;
        let scale = z / total;

        let mut predictions = Vec::with_capacity(m + n);
        for (position, &index) in active_seasonal.iter().enumerate() {
            predictions
                .push(component_values[position] - self.seasonal.mean_value_at(index));
        }
        for (position, &index) in active_calendar.iter().enumerate() {
            predictions
                .push(component_values[m + position] - self.calendar.mean_value_at(index));
        }

        // Variance attributed to each part, for the error trackers.
        let mut variances = Vec::with_capacity(m + n + 1);
        variances
            .push(if self.using_trend_for_prediction { self.trend.variance() } else { 0.0 });
        for &index in &active_seasonal {
            variances.push(self.seasonal.value_at(index, time).1);
        }
        for &index in &active_calendar {
            variances.push(self.calendar.value_at(index, time).1);
        }
        let variance: f64 = variances.iter().sum();
        let expected_share = 1.0 / total;

        let test_for_trend = !self.using_trend_for_prediction
            && self.trend.observed_interval() > 6 * self.bucket_length;

        self.trend.add(time, trend_value + error / z, weight);
        for (position, &index) in active_seasonal.iter().enumerate() {
            let target = component_values[position] + error / z + deltas[position];
            let update_weight = if self.seasonal.initialized_at(index) {
                weight
            } else {
                SEASONAL_INITIAL_WEIGHT * initial_weight
            };
            self.seasonal.add_value(index, time, target, update_weight);
            let share = if variance == 0.0 {
                1.0
            } else {
                variances[position + 1] / variance / expected_share
            };
            self.seasonal
                .add_error(index, reference_error, error, predictions[position], share, weight);
        }
        for (position, &index) in active_calendar.iter().enumerate() {
            let target = component_values[m + position] + error / z;
            let update_weight =
                if self.calendar.initialized_at(index) { weight } else { initial_weight };
            self.calendar.add_value(index, time, target, update_weight);
            let share = if variance == 0.0 {
                1.0
            } else {
                variances[m + position + 1] / variance / expected_share
            };
            self.calendar.add_error(
                index,
                reference_error,
                error,
                predictions[m + position],
                share,
                weight,
            );
        }

        self.mean_variance_scale.add(scale, weight);
        self.prediction_error_without_trend.add(error + trend_value, weight);
        self.prediction_error_with_trend.add(error, weight);
        self.gain_controller.add(time, &predictions);

        if test_for_trend && self.should_use_trend_for_prediction() {
            debug!(time, "detected trend");
            (callbacks.annotation)("Detected trend");
            return vec![Message::DetectedTrend];
        }
        Vec::new()
    }

    pub fn handle_detected_seasonal(
        &mut self,
        time: TimePoint,
        proposal: &SeasonalDecomposition,
        breaker: &dyn MemoryCircuitBreaker,
        callbacks: &mut StoreCallbacks,
        noise_seed: u64,
    ) {
        match self.state {
            StoreState::Normal | StoreState::NewComponents => {}
            StoreState::Disabled => return,
            StoreState::Error => {
                error!("components in a bad state");
                self.apply(StoreSymbol::Reset);
                return;
            }
        }

        let removed =
            proposal.seasonal_to_remove_mask.iter().filter(|&&remove| remove).count();
        let net_count =
            self.seasonal.len() - removed.min(self.seasonal.len()) + proposal.seasonal.len();
        if net_count + self.calendar.len() > self.max_components {
            debug!(time, "dropping seasonal proposal: component budget exhausted");
            return;
        }

        let size_change =
            self.seasonal.estimate_size_change(proposal, self.seasonal_component_size);
        if !breaker.allocations_allowed() && size_change > 0 {
            // Under hard memory limit nothing may grow.
            trace!(time, "dropping seasonal proposal: memory hard limit");
            return;
        }

        if !self.seasonal.remove(&proposal.seasonal_to_remove_mask) {
            // The proposal disagrees with the modelled components; bail.
            error!(
                mask_len = proposal.seasonal_to_remove_mask.len(),
                components = self.seasonal.len(),
                "unexpected seasonal components to remove"
            );
            return;
        }

        debug!(time, "detected change in seasonal components");
        if proposal.seasonal.is_empty() {
            debug!("removed all seasonality");
            (callbacks.annotation)("removed all seasonality");
        }
        for component in &proposal.seasonal {
            self.seasonal.add(SeasonalComponent::from_proposal(
                component,
                self.seasonal_component_size,
                self.decay_rate,
                proposal.trend.start_time,
            ));
            (callbacks.annotation)(&component.annotation);
        }
        self.seasonal.refresh_for_new_components();
        self.seasonal.clear_errors();
        self.calendar.clear_errors();

        // Reinitialize the gain controller by replaying predictions over
        // the retained history.
        self.gain_controller.clear();
        let mut predictions = Vec::new();
        let mut replay_time = proposal.trend.start_time;
        while replay_time < proposal.trend.end_time {
            predictions.clear();
            self.seasonal.append_predictions(replay_time, &mut predictions);
            self.calendar.append_predictions(replay_time, &mut predictions);
            self.gain_controller.seed(&predictions);
            self.gain_controller.age(age_factor_daily(self.decay_rate, self.bucket_length));
            replay_time += self.bucket_length;
        }

        // Refit the trend over the proposal's history.
        let mut trend = TrendComponent::new(self.decay_rate);
        let dt = proposal.trend.bucket_length;
        let mut fit_time = proposal.trend.start_time;
        for value in &proposal.trend.initial_values {
            if value.count() > 0.0 {
                trend.add(fit_time, value.mean(), value.count());
                trend.propagate_forwards_by_time(dt);
            }
            fit_time += dt;
        }
        self.trend = trend;
        self.using_trend_for_prediction = true;

        // Hand the residuals of the new fit to the downstream models,
        // re-noised for the variance averaging smoothed away.
        let mut residuals = proposal.trend.initial_values.clone();
        let mut residual_time = proposal.trend.start_time;
        for value in &mut residuals {
            if value.count() > 0.0 {
                value.shift(-self.trend.value(residual_time).0);
            }
            residual_time += dt;
        }
        add_mean_zero_normal_noise(noise_seed, proposal.within_bucket_variance, &mut residuals);
        (callbacks.component_change)(residuals);

        self.apply(StoreSymbol::AddedComponents);
    }

    pub fn handle_detected_calendar(
        &mut self,
        time: TimePoint,
        feature: decompose_spi::CalendarFeature,
        time_zone_offset: TimePoint,
        breaker: &dyn MemoryCircuitBreaker,
        callbacks: &mut StoreCallbacks,
    ) {
        match self.state {
            StoreState::Normal | StoreState::NewComponents => {}
            StoreState::Disabled => return,
            StoreState::Error => {
                error!("components in a bad state");
                self.apply(StoreSymbol::Reset);
                return;
            }
        }
        if self.component_count() + 1 > self.max_components {
            return;
        }
        if self.calendar.has(&feature) {
            return;
        }
        if !breaker.allocations_allowed() {
            // Under hard memory limit nothing may grow.
            trace!(time, "dropping calendar feature: memory hard limit");
            return;
        }
        debug!(%feature, time, "detected calendar feature");
        (callbacks.annotation)(&format!("Detected calendar feature: {feature}"));
        self.calendar.add(CalendarComponent::new(
            feature,
            time_zone_offset,
            self.calendar_component_size,
            self.decay_rate,
        ));
        self.apply(StoreSymbol::AddedComponents);
    }

    pub fn apply_change_point(
        &mut self,
        time: TimePoint,
        change: &ChangePoint,
        callbacks: &mut StoreCallbacks,
    ) {
        match change.kind() {
            ChangePointKind::LevelShift { shift } => self.trend.shift_level(shift),
            ChangePointKind::TrendOnset { slope } => {
                self.trend.shift_slope(change.time(), slope)
            }
            ChangePointKind::ScaleChange { .. } => {}
        }
        self.seasonal.apply_change(change);
        self.calendar.apply_change(change);
        if !self.using_trend_for_prediction {
            (callbacks.component_change)(change.residuals().to_vec());
            self.using_trend_for_prediction = true;
        }
        debug!(%change, time, "applied change point");
        (callbacks.annotation)(&format!("Detected {change}"));
    }

    // ========================================================================
    // Interpolation and canonicalization
    // ========================================================================

    fn should_interpolate(&self, time: TimePoint) -> bool {
        self.state == StoreState::NewComponents
            || self.seasonal.should_interpolate(time)
            || self.calendar.should_interpolate(time)
    }

    fn interpolate(&mut self, time: TimePoint, callbacks: &mut StoreCallbacks) {
        match self.state {
            StoreState::Normal | StoreState::NewComponents => {
                self.canonicalize(time);
                if self.should_interpolate(time) {
                    trace!(time, "interpolating components");
                    // Components that picked up non-finite values are
                    // dropped and downstream is told the set changed.
                    if self.seasonal.remove_bad(time) {
                        (callbacks.component_change)(Vec::new());
                    }
                    self.seasonal.interpolate(time, true);
                    if self.calendar.remove_bad(time) {
                        (callbacks.component_change)(Vec::new());
                    }
                    self.calendar.interpolate(time, true);
                    self.apply(StoreSymbol::Interpolated);
                }
            }
            StoreState::Disabled => {}
            StoreState::Error => {
                error!("components in a bad state");
                self.apply(StoreSymbol::Reset);
            }
        }
    }

    fn shift_origin(&mut self, time: TimePoint) {
        let time = time - (DAY as f64 / self.decay_rate / 2.0) as TimePoint;
        self.trend.shift_origin(time);
        self.seasonal.shift_origin(time);
        self.gain_controller.shift_origin(time);
    }

    /// The additive decomposition is redundant: constants summing to zero
    /// can move freely between components. Choose the canonical form which
    /// minimizes component magnitudes, pushing common levels and slopes
    /// into the trend.
    fn canonicalize(&mut self, time: TimePoint) {
        self.shift_origin(time);

        self.seasonal.prune(time, self.bucket_length);
        self.calendar.prune(time, self.bucket_length);

        if self.seasonal.is_empty() {
            return;
        }

        type Window = (TimePoint, TimePoint);
        let unwindowed: Window = (0, 0);
        let mut levels: std::collections::BTreeMap<Window, (f64, f64)> = Default::default();
        let mut slopes: std::collections::BTreeMap<Window, (f64, f64)> = Default::default();
        for component in self.seasonal.components() {
            let window = if component.time().is_windowed() {
                component.time().window()
            } else {
                unwindowed
            };
            let level = levels.entry(window).or_insert((0.0, 0.0));
            level.0 += component.mean_value();
            level.1 += 1.0;
            if component.slope_accurate() {
                let slope = slopes.entry(window).or_insert((0.0, 0.0));
                slope.0 += component.slope();
                slope.1 += 1.0;
            }
        }

        let mut common_level = MinMaxAccumulator::new();
        for (sum, _) in levels.values() {
            common_level.add(*sum);
        }
        let level_margin = common_level.sign_margin();
        if level_margin != 0.0 {
            for index in 0..self.seasonal.len() {
                let component = &self.seasonal.components()[index];
                let window = if component.time().is_windowed() {
                    component.time().window()
                } else {
                    unwindowed
                };
                if let Some((sum, count)) = levels.get(&window) {
                    let target = (sum - level_margin) / count - component.mean_value();
                    self.seasonal_shift_level(index, target);
                }
            }
            self.trend.shift_level(level_margin);
        }

        let mut common_slope = MinMaxAccumulator::new();
        for (sum, _) in slopes.values() {
            common_slope.add(*sum);
        }
        let slope_margin = common_slope.sign_margin();
        if slope_margin != 0.0 {
            for index in 0..self.seasonal.len() {
                let component = &self.seasonal.components()[index];
                if !component.slope_accurate() {
                    continue;
                }
                let window = if component.time().is_windowed() {
                    component.time().window()
                } else {
                    unwindowed
                };
                if let Some((sum, count)) = slopes.get(&window) {
                    let target = (sum - slope_margin) / count - component.slope();
                    self.seasonal_shift_slope(index, time, target);
                }
            }
            self.trend.shift_slope(time, slope_margin);
        }
    }

    fn seasonal_shift_level(&mut self, index: usize, delta: f64) {
        let components = self.seasonal_components_mut();
        components[index].shift_level(delta);
    }

    fn seasonal_shift_slope(&mut self, index: usize, time: TimePoint, delta: f64) {
        let components = self.seasonal_components_mut();
        components[index].shift_slope(time, delta);
    }

    fn seasonal_components_mut(&mut self) -> &mut [SeasonalComponent] {
        self.seasonal.components_mut()
    }

    // ========================================================================
    // Trend selection
    // ========================================================================

    /// F-test of the prediction error with the trend against without it,
    /// blended with the variance ratio through logistic weights.
    fn should_use_trend_for_prediction(&mut self) -> bool {
        let v0 = self.prediction_error_without_trend.variance();
        let v1 = self.prediction_error_with_trend.variance();
        let df0 = self.prediction_error_without_trend.count() - 1.0;
        let df1 = self.prediction_error_with_trend.count() - self.trend.parameters();
        if df0 > 0.0 && df1 > 0.0 && v0 > 0.0 {
            let relative_log_significance =
                left_tail_f_test(v1, v0, df1, df0).max(f64::MIN_POSITIVE).ln() / 0.001_f64.ln();
            let vt = 0.6 * v0;
            let p = logistic(relative_log_significance, 0.1, 1.0, 1.0)
                * if vt > v1 {
                    logistic(vt / v1, 1.0, 1.0, 1.0)
                } else {
                    logistic(v1 / vt, 0.1, 1.0, -1.0)
                };
            self.using_trend_for_prediction = p >= USE_TREND_THRESHOLD;
        }
        self.using_trend_for_prediction
    }

    // ========================================================================
    // State machine and housekeeping
    // ========================================================================

    fn apply(&mut self, symbol: StoreSymbol) {
        let old = self.state;
        self.state = match (symbol, self.state) {
            (StoreSymbol::AddedComponents, StoreState::NewComponents | StoreState::Normal) => {
                StoreState::NewComponents
            }
            (StoreSymbol::AddedComponents, state) => state,
            (StoreSymbol::Interpolated, StoreState::NewComponents | StoreState::Normal) => {
                StoreState::Normal
            }
            (StoreSymbol::Interpolated, state) => state,
            (StoreSymbol::Reset, _) => {
                self.trend.clear();
                self.seasonal = SeasonalSet::new();
                self.calendar = CalendarSet::new();
                StoreState::Normal
            }
        };
        if self.state != old {
            trace!(from = old.name(), to = self.state.name(), "components transition");
        }
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
        self.trend.set_decay_rate(decay_rate);
        self.seasonal.set_decay_rate(decay_rate);
        self.calendar.set_decay_rate(decay_rate);
    }

    pub fn propagate_forwards(&mut self, start: TimePoint, end: TimePoint) {
        if end <= start {
            return;
        }
        let factor = age_factor_daily(self.decay_rate, DAY);
        let trend = &mut self.trend;
        let mean_variance_scale = &mut self.mean_variance_scale;
        let with_trend = &mut self.prediction_error_with_trend;
        let without_trend = &mut self.prediction_error_without_trend;
        let gain_controller = &mut self.gain_controller;
        stats::stepwise_propagate(start, end, DAY, |_| {
            trend.propagate_forwards_by_time(DAY);
            mean_variance_scale.age(factor);
            with_trend.age(factor);
            without_trend.age(factor);
            gain_controller.age(factor);
        });
        self.seasonal.propagate_forwards(start, end);
        self.calendar.propagate_forwards(start, end);
    }

    pub fn size(&self) -> usize {
        self.seasonal.size() + self.calendar.size()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.trend.memory_usage()
            + self.seasonal.memory_usage()
            + self.calendar.memory_usage()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("version", "6.3");
        writer.field("state", self.state.name());
        writer.field("decay_rate", self.decay_rate);
        writer.level("gain_controller", |w| self.gain_controller.persist(w));
        writer.level("trend", |w| self.trend.persist(w));
        if !self.seasonal.is_empty() {
            writer.level("seasonal", |w| self.seasonal.persist(w));
        }
        if !self.calendar.is_empty() {
            writer.level("calendar", |w| self.calendar.persist(w));
        }
        stats::persist_mean(writer, "mean_variance_scale", &self.mean_variance_scale);
        stats::persist_mean_var(writer, "moments", &self.prediction_error_without_trend);
        stats::persist_mean_var(writer, "moments_minus_trend", &self.prediction_error_with_trend);
        writer.field("using_trend_for_prediction", self.using_trend_for_prediction);
    }

    pub fn restore(&mut self, reader: &DocumentReader) -> bool {
        if reader.value("version") != Some("6.3") {
            error!("unsupported components state version");
            return false;
        }
        let Some(state) = (match reader.value("state") {
            Some("NEW_COMPONENTS") => Some(StoreState::NewComponents),
            Some("NORMAL") => Some(StoreState::Normal),
            // Legacy forecasting state maps to normal.
            Some("FORECASTING") => Some(StoreState::Normal),
            Some("DISABLED") => Some(StoreState::Disabled),
            Some("ERROR") => Some(StoreState::Error),
            _ => None,
        }) else {
            return false;
        };
        let Some(decay_rate) = reader.parse("decay_rate") else {
            return false;
        };
        let Some(gain_controller) =
            reader.level("gain_controller").and_then(|level| GainController::restore(&level))
        else {
            return false;
        };
        let Some(trend) = reader
            .level("trend")
            .and_then(|level| TrendComponent::restore(&level, decay_rate))
        else {
            return false;
        };
        let seasonal = match reader.level("seasonal") {
            Some(level) => match SeasonalSet::restore(&level, decay_rate) {
                Some(seasonal) => seasonal,
                None => return false,
            },
            None => SeasonalSet::new(),
        };
        let calendar = match reader.level("calendar") {
            Some(level) => match CalendarSet::restore(&level, decay_rate) {
                Some(calendar) => calendar,
                None => return false,
            },
            None => CalendarSet::new(),
        };
        let (Some(scale), Some(without_trend), Some(with_trend), Some(using_trend)) = (
            stats::restore_mean(reader, "mean_variance_scale"),
            stats::restore_mean_var(reader, "moments"),
            stats::restore_mean_var(reader, "moments_minus_trend"),
            reader.parse("using_trend_for_prediction"),
        ) else {
            return false;
        };

        self.state = state;
        self.decay_rate = decay_rate;
        self.gain_controller = gain_controller;
        self.trend = trend;
        self.seasonal = seasonal;
        self.calendar = calendar;
        self.mean_variance_scale = scale;
        self.prediction_error_without_trend = without_trend;
        self.prediction_error_with_trend = with_trend;
        self.using_trend_for_prediction = using_trend;
        self.set_decay_rate(decay_rate);
        true
    }

    #[cfg(test)]
    fn trend_mut_for_tests(&mut self) -> &mut TrendComponent {
        &mut self.trend
    }

    #[cfg(test)]
    fn force_use_trend_for_tests(&mut self) {
        self.using_trend_for_prediction = true;
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.str(self.state.name())
            .f64(self.decay_rate)
            .i64(self.bucket_length)
            .usize(self.seasonal_component_size)
            .usize(self.calendar_component_size);
        self.trend.checksum(ck);
        self.seasonal.checksum(ck);
        self.calendar.checksum(ck);
        stats::checksum_mean(ck, &self.mean_variance_scale);
        stats::checksum_mean_var(ck, &self.prediction_error_without_trend);
        stats::checksum_mean_var(ck, &self.prediction_error_with_trend);
        self.gain_controller.checksum(ck);
        ck.bool(self.using_trend_for_prediction);
    }
}

/// Sum the per-component statistic, averaging across windowed partitions:
/// fully periodic components add directly, while the windows of a
/// partition contribute a duration-weighted mean.
fn mean_of(components: &[SeasonalComponent], statistic: impl Fn(&SeasonalComponent) -> f64) -> f64 {
    let mut unwindowed = 0.0;
    let mut windows: std::collections::BTreeMap<(TimePoint, TimePoint), f64> = Default::default();
    for component in components {
        if !component.initialized() {
            continue;
        }
        if component.time().is_windowed() {
            *windows.entry(component.time().window()).or_insert(0.0) += statistic(component);
        } else {
            unwindowed += statistic(component);
        }
    }
    let mut windowed = MeanAccumulator::new();
    for (window, sum) in windows {
        windowed.add(sum, (window.1 - window.0) as f64);
    }
    unwindowed + windowed.mean()
}
