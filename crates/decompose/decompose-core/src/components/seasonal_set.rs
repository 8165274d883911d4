//! The collection of seasonal components and their error statistics.

use std::collections::BTreeMap;

use tracing::debug;

use decompose_spi::{DocumentReader, DocumentWriter, SeasonalDecomposition, TimePoint};

use crate::change_point::{ChangePoint, ChangePointKind};
use crate::checksum::Checksummer;
use crate::error_stats::ComponentErrors;
use crate::seasonal::SeasonalComponent;
use crate::stats::stepwise_propagate;

type Window = (TimePoint, TimePoint);

/// Seasonal components, sorted shortest period first, each paired with its
/// prediction error history.
#[derive(Debug, Clone, Default)]
pub struct SeasonalSet {
    components: Vec<SeasonalComponent>,
    errors: Vec<ComponentErrors>,
}

impl SeasonalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[SeasonalComponent] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [SeasonalComponent] {
        &mut self.components
    }

    pub fn initialized_any(&self) -> bool {
        self.components.iter().any(|component| component.initialized())
    }

    /// Indexes of the components active at `time`.
    pub fn active_at(&self, time: TimePoint) -> Vec<usize> {
        (0..self.components.len())
            .filter(|&index| self.components[index].time().in_window(time))
            .collect()
    }

    /// Slope-bleed damping between harmonics: for each longer component,
    /// transfer a tenth of the estimated leakage of the longest shorter
    /// component whose period divides it.
    pub fn deltas(&self, time: TimePoint, active: &[usize]) -> Vec<f64> {
        let mut deltas = vec![0.0; active.len()];
        for i in 1..active.len() {
            let period = self.components[active[i]].time().period();
            for j in (0..i).rev() {
                let shorter = self.components[active[j]].time().period();
                if period % shorter == 0 {
                    let value = self.components[active[j]].value(time).0
                        - self.components[active[j]].mean_value();
                    let delta = 0.1 * self.components[active[i]].delta(time, shorter, value);
                    deltas[j] += delta;
                    deltas[i] -= delta;
                    break;
                }
            }
        }
        deltas
    }

    pub fn value_at(&self, index: usize, time: TimePoint) -> (f64, f64) {
        self.components[index].value(time)
    }

    pub fn mean_value_at(&self, index: usize) -> f64 {
        self.components[index].mean_value()
    }

    pub fn add_value(&mut self, index: usize, time: TimePoint, value: f64, weight: f64) {
        self.components[index].add(time, value, weight);
    }

    pub fn initialized_at(&self, index: usize) -> bool {
        self.components[index].initialized()
    }

    pub fn add_error(
        &mut self,
        index: usize,
        reference_error: f64,
        error: f64,
        prediction: f64,
        variance_increase: f64,
        weight: f64,
    ) {
        self.errors[index].add(reference_error, error, prediction, variance_increase, weight);
    }

    /// Centred predictions of the active components, appended in order.
    pub fn append_predictions(&self, time: TimePoint, predictions: &mut Vec<f64>) {
        for component in &self.components {
            if component.time().in_window(time) {
                predictions.push(component.value(time).0 - component.mean_value());
            }
        }
    }

    /// Combined prediction at `time`.
    pub fn prediction(&self, time: TimePoint) -> f64 {
        self.components
            .iter()
            .filter(|component| component.time().in_window(time))
            .map(|component| component.value(time).0)
            .sum()
    }

    /// Prediction restricted to components selected by `mask`.
    pub fn masked_prediction(&self, time: TimePoint, mask: &[bool]) -> f64 {
        self.components
            .iter()
            .zip(mask)
            .filter(|(component, &keep)| keep && component.time().in_window(time))
            .map(|(component, _)| component.value(time).0)
            .sum()
    }

    pub fn should_interpolate(&self, time: TimePoint) -> bool {
        self.components.iter().any(|component| component.should_interpolate(time))
    }

    pub fn interpolate(&mut self, time: TimePoint, refine: bool) {
        for component in &mut self.components {
            if component.should_interpolate(time) {
                component.interpolate(time, refine);
            }
        }
    }

    pub fn add(&mut self, component: SeasonalComponent) {
        self.components.push(component);
        self.errors.push(ComponentErrors::new());
    }

    /// Sort components and their errors by period ascending.
    pub fn refresh_for_new_components(&mut self) {
        let components = std::mem::take(&mut self.components);
        let errors = std::mem::take(&mut self.errors);
        let mut paired: Vec<(SeasonalComponent, ComponentErrors)> =
            components.into_iter().zip(errors).collect();
        paired.sort_by_key(|(component, _)| *component.time());
        for (component, error) in paired {
            self.components.push(component);
            self.errors.push(error);
        }
    }

    /// Remove the components marked by `mask`; fails when the mask does not
    /// match the current component count.
    pub fn remove(&mut self, mask: &[bool]) -> bool {
        if mask.len() != self.components.len() {
            return false;
        }
        let mut keep = mask.iter().map(|&remove| !remove);
        self.components.retain(|_| keep.next().unwrap_or(true));
        let mut keep = mask.iter().map(|&remove| !remove);
        self.errors.retain(|_| keep.next().unwrap_or(true));
        true
    }

    /// Estimated memory delta of applying a proposal, in bytes.
    pub fn estimate_size_change(
        &self,
        proposal: &SeasonalDecomposition,
        component_size: usize,
    ) -> isize {
        if proposal.seasonal_to_remove_mask.len() != self.components.len() {
            return 0;
        }
        let removed: usize = proposal
            .seasonal_to_remove_mask
            .iter()
            .zip(&self.components)
            .filter(|(&remove, _)| remove)
            .map(|(_, component)| component.memory_usage())
            .sum();
        let added = proposal.seasonal.len() * crate::seasonal::estimated_size(component_size);
        added as isize - removed as isize
    }

    /// Prune components whose error history says they are uninformative,
    /// keeping at least one component per windowed partition and shifting
    /// removed mean levels into a surviving component. Returns true when
    /// the set ends up empty.
    pub fn prune(&mut self, time: TimePoint, bucket_length: TimePoint) -> bool {
        if self.components.len() > 1 {
            let mut windowed: BTreeMap<Window, usize> = BTreeMap::new();
            for component in &self.components {
                if component.time().is_windowed() {
                    *windowed.entry(component.time().window()).or_insert(0) += 1;
                }
            }

            let mut remove = vec![false; self.components.len()];
            let mut shifts: BTreeMap<Window, f64> = BTreeMap::new();
            for (index, component) in self.components.iter().enumerate() {
                let window = component.time().window();
                let survivors = windowed.get(&window).copied();
                if survivors.map_or(true, |count| count > 1)
                    && self.errors[index].remove(bucket_length, component.time().period())
                {
                    debug!(
                        period = component.time().period(),
                        time, "removing uninformative seasonal component"
                    );
                    remove[index] = true;
                    *shifts.entry(window).or_insert(0.0) += component.mean_value();
                    if let Some(count) = windowed.get_mut(&window) {
                        *count -= 1;
                    }
                }
            }

            if remove.iter().any(|&flag| flag) {
                let removed_mask = remove.clone();
                self.remove(&removed_mask);

                for (window, shift) in shifts {
                    let survivor_index = self
                        .components
                        .iter()
                        .position(|component| component.time().window() == window)
                        .or_else(|| {
                            self.components
                                .iter()
                                .position(|component| !component.time().is_windowed())
                        });
                    if let Some(index) = survivor_index {
                        self.components[index].shift_level(shift);
                    }
                }
            }
        }
        self.components.is_empty()
    }

    /// Remove components with non-finite values. Returns true when any were
    /// removed.
    pub fn remove_bad(&mut self, time: TimePoint) -> bool {
        let mask: Vec<bool> =
            self.components.iter().map(|component| component.is_bad()).collect();
        if mask.iter().any(|&bad| bad) {
            for (component, _) in self.components.iter().zip(&mask).filter(|(_, &bad)| bad) {
                debug!(
                    period = component.time().period(),
                    time, "removing seasonal component with invalid values"
                );
            }
            self.remove(&mask);
            return true;
        }
        false
    }

    pub fn apply_change(&mut self, change: &ChangePoint) {
        match change.kind() {
            ChangePointKind::LevelShift { .. } | ChangePointKind::TrendOnset { .. } => {}
            ChangePointKind::ScaleChange { scale } => {
                for (component, errors) in self.components.iter_mut().zip(&mut self.errors) {
                    component.apply_scale(scale);
                    errors.clear();
                }
            }
        }
    }

    pub fn shift_origin(&mut self, time: TimePoint) {
        for component in &mut self.components {
            component.shift_origin(time);
        }
    }

    pub fn clear_errors(&mut self) {
        for errors in &mut self.errors {
            errors.clear();
        }
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        for component in &mut self.components {
            component.set_decay_rate(decay_rate);
        }
    }

    pub fn propagate_forwards(&mut self, start: TimePoint, end: TimePoint) {
        for (component, errors) in self.components.iter_mut().zip(&mut self.errors) {
            let period = component.time().period();
            let decay_rate = component.decay_rate();
            stepwise_propagate(start, end, period, |time| {
                component.age((-decay_rate * time / 6.0).exp());
                errors.age((-decay_rate * time).exp());
            });
        }
    }

    pub fn size(&self) -> usize {
        self.components.iter().map(|component| component.size()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.components.iter().map(|component| component.memory_usage()).sum::<usize>()
            + self.errors.len() * std::mem::size_of::<ComponentErrors>()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("version", "6.4");
        for component in &self.components {
            writer.level("component", |w| component.persist(w));
        }
        for errors in &self.errors {
            writer.level("errors", |w| errors.persist(w));
        }
    }

    pub fn restore(reader: &DocumentReader, decay_rate: f64) -> Option<Self> {
        if reader.value("version") != Some("6.4") {
            return None;
        }
        let mut result = Self::new();
        for level in reader.levels("component") {
            result.components.push(SeasonalComponent::restore(&level, decay_rate)?);
        }
        for level in reader.levels("errors") {
            result.errors.push(ComponentErrors::restore(&level)?);
        }
        if result.errors.len() != result.components.len() {
            return None;
        }
        Some(result)
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.usize(self.components.len());
        for component in &self.components {
            component.checksum(ck);
        }
        for errors in &self.errors {
            errors.checksum(ck);
        }
    }
}
