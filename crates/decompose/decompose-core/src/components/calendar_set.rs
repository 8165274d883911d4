//! The collection of calendar components and their error statistics.

use tracing::debug;

use decompose_spi::{CalendarFeature, DocumentReader, DocumentWriter, TimePoint, MONTH};

use crate::calendar::CalendarComponent;
use crate::change_point::{ChangePoint, ChangePointKind};
use crate::checksum::Checksummer;
use crate::error_stats::ComponentErrors;
use crate::stats::stepwise_propagate;

#[derive(Debug, Clone, Default)]
pub struct CalendarSet {
    components: Vec<CalendarComponent>,
    errors: Vec<ComponentErrors>,
}

impl CalendarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[CalendarComponent] {
        &self.components
    }

    pub fn initialized_any(&self) -> bool {
        self.components.iter().any(|component| component.initialized())
    }

    pub fn has(&self, feature: &CalendarFeature) -> bool {
        self.components.iter().any(|component| component.feature() == feature)
    }

    pub fn active_at(&self, time: TimePoint) -> Vec<usize> {
        (0..self.components.len())
            .filter(|&index| self.components[index].in_window(time))
            .collect()
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

    pub fn append_predictions(&self, time: TimePoint, predictions: &mut Vec<f64>) {
        for component in &self.components {
            if component.in_window(time) {
                predictions.push(component.value(time).0 - component.mean_value());
            }
        }
    }

    pub fn prediction(&self, time: TimePoint) -> f64 {
        self.components
            .iter()
            .filter(|component| component.in_window(time))
            .map(|component| component.value(time).0)
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

    pub fn add(&mut self, component: CalendarComponent) {
        self.components.push(component);
        self.errors.push(ComponentErrors::new());
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

    /// Prune components whose error history says they no longer help.
    /// Returns true when the set ends up empty.
    pub fn prune(&mut self, time: TimePoint, bucket_length: TimePoint) -> bool {
        let mask: Vec<bool> = self
            .components
            .iter()
            .zip(&self.errors)
            .map(|(component, errors)| {
                let remove = errors.remove(bucket_length, component.feature().window());
                if remove {
                    debug!(feature = %component.feature(), time, "removing calendar component");
                }
                remove
            })
            .collect();
        if mask.iter().any(|&remove| remove) {
            self.remove(&mask);
        }
        self.components.is_empty()
    }

    pub fn remove_bad(&mut self, time: TimePoint) -> bool {
        let mask: Vec<bool> =
            self.components.iter().map(|component| component.is_bad()).collect();
        if mask.iter().any(|&bad| bad) {
            for (component, _) in self.components.iter().zip(&mask).filter(|(_, &bad)| bad) {
                debug!(
                    feature = %component.feature(),
                    time, "removing calendar component with invalid values"
                );
            }
            self.remove(&mask);
            return true;
        }
        false
    }

    fn remove(&mut self, mask: &[bool]) {
        let mut keep = mask.iter().map(|&remove| !remove);
        self.components.retain(|_| keep.next().unwrap_or(true));
        let mut keep = mask.iter().map(|&remove| !remove);
        self.errors.retain(|_| keep.next().unwrap_or(true));
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
            let decay_rate = component.decay_rate();
            stepwise_propagate(start, end, MONTH, |time| {
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
            result.components.push(CalendarComponent::restore(&level, decay_rate)?);
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
