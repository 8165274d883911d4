//! Seasonal component.

use decompose_spi::{
    DocumentReader, DocumentWriter, SeasonalComponentProposal, SeasonalTime, TimePoint,
};

use crate::bucketed::BucketedPeriodicFunction;
use crate::checksum::Checksummer;

/// One repeating component of the decomposition, active inside its time
/// descriptor's window.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalComponent {
    time: SeasonalTime,
    function: BucketedPeriodicFunction,
}

impl SeasonalComponent {
    pub fn new(time: SeasonalTime, size: usize, decay_rate: f64) -> Self {
        Self { time, function: BucketedPeriodicFunction::new(time.period(), size, decay_rate) }
    }

    /// Create and seed a component from a detected proposal. The initial
    /// values span one full window repeat, aligned to the repeat boundary
    /// at or before `start_time`; the component is interpolated so it
    /// predicts immediately.
    pub fn from_proposal(
        proposal: &SeasonalComponentProposal,
        size: usize,
        decay_rate: f64,
        start_time: TimePoint,
    ) -> Self {
        let mut component = Self::new(proposal.time, size, decay_rate);
        if proposal.initial_values.is_empty() {
            return component;
        }
        let repeat = proposal.time.window_repeat();
        let step = (repeat / proposal.initial_values.len() as TimePoint).max(1);
        let origin = decompose_spi::floor_to(start_time, repeat);
        let mut last_time = start_time;
        for (index, value) in proposal.initial_values.iter().enumerate() {
            if value.count() > 0.0 {
                let time = origin + index as TimePoint * step;
                if component.time.in_window(time) {
                    component.add(time, value.mean(), value.count());
                    last_time = last_time.max(time);
                }
            }
        }
        component.function.interpolate(last_time + 1, true);
        component
    }

    pub fn time(&self) -> &SeasonalTime {
        &self.time
    }

    pub fn initialized(&self) -> bool {
        self.function.initialized()
    }

    pub fn add(&mut self, time: TimePoint, value: f64, weight: f64) {
        let offset = self.time.offset(time);
        self.function.add(time, offset, value, weight);
    }

    pub fn value(&self, time: TimePoint) -> (f64, f64) {
        self.function.value(self.time.offset(time))
    }

    pub fn mean_value(&self) -> f64 {
        self.function.mean_value()
    }

    pub fn mean_variance(&self) -> f64 {
        self.function.mean_variance()
    }

    pub fn slope(&self) -> f64 {
        self.function.slope()
    }

    pub fn slope_accurate(&self) -> bool {
        self.function.slope_accurate()
    }

    pub fn should_interpolate(&self, time: TimePoint) -> bool {
        self.function.should_interpolate(time)
    }

    pub fn interpolate(&mut self, time: TimePoint, refine: bool) {
        self.function.interpolate(time, refine);
    }

    pub fn shift_level(&mut self, delta: f64) {
        self.function.shift_level(delta);
    }

    pub fn shift_slope(&mut self, time: TimePoint, delta: f64) {
        self.function.shift_slope(time, delta);
    }

    pub fn shift_origin(&mut self, time: TimePoint) {
        self.function.shift_origin(time);
    }

    pub fn apply_scale(&mut self, factor: f64) {
        self.function.apply_scale(factor);
    }

    pub fn age(&mut self, factor: f64) {
        self.function.age(factor);
    }

    pub fn decay_rate(&self) -> f64 {
        self.function.decay_rate()
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.function.set_decay_rate(decay_rate);
    }

    /// Leakage of a shorter harmonic into this component; see
    /// `BucketedPeriodicFunction::delta`.
    pub fn delta(&self, time: TimePoint, shorter_period: TimePoint, value: f64) -> f64 {
        self.function.delta(self.time.offset(time), shorter_period, value)
    }

    pub fn is_bad(&self) -> bool {
        !self.time.is_valid() || self.function.is_bad()
    }

    pub fn size(&self) -> usize {
        self.function.size()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<BucketedPeriodicFunction>()
            + self.function.memory_usage()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("period", self.time.period());
        writer.field("window_start", self.time.window().0);
        writer.field("window_end", self.time.window().1);
        writer.field("window_repeat", self.time.window_repeat());
        writer.level("function", |w| self.function.persist(w));
    }

    pub fn restore(reader: &DocumentReader, decay_rate: f64) -> Option<Self> {
        let time = SeasonalTime::windowed(
            reader.parse("period")?,
            reader.parse("window_start")?,
            reader.parse("window_end")?,
            reader.parse("window_repeat")?,
        );
        let function =
            BucketedPeriodicFunction::restore(&reader.level("function")?, decay_rate)?;
        Some(Self { time, function })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.i64(self.time.period())
            .i64(self.time.window().0)
            .i64(self.time.window().1)
            .i64(self.time.window_repeat());
        self.function.checksum(ck);
    }
}

/// Helper used when estimating the memory cost of a proposal before
/// creating the component.
pub fn estimated_size(size_buckets: usize) -> usize {
    let probe = SeasonalComponent::new(SeasonalTime::periodic(decompose_spi::DAY), size_buckets, 0.0);
    probe.memory_usage()
}

#[cfg(test)]
mod tests {
    use super::*;
    use decompose_spi::{MeanAccumulator, DAY, WEEK};

    fn daily_component() -> SeasonalComponent {
        let mut component = SeasonalComponent::new(SeasonalTime::periodic(DAY), 24, 0.012);
        for day in 0..4 {
            for hour in 0..24 {
                let time = day * DAY + hour * 3600 + 1800;
                let value =
                    (2.0 * std::f64::consts::PI * (time % DAY) as f64 / DAY as f64).cos();
                component.add(time, value, 1.0);
            }
        }
        component.interpolate(4 * DAY, true);
        component
    }

    #[test]
    fn test_learns_daily_shape() {
        let component = daily_component();
        assert!(component.initialized());
        let (mean, _) = component.value(10 * DAY + 1800);
        let expected = (2.0 * std::f64::consts::PI * 1800.0 / DAY as f64).cos();
        assert!((mean - expected).abs() < 0.1, "{mean} vs {expected}");
    }

    #[test]
    fn test_windowed_component_offsets() {
        // Weekend window anchored two days into the (Thursday-based) epoch
        // week: Saturday and Sunday.
        let weekend = SeasonalTime::windowed(DAY, 2 * DAY, 4 * DAY, WEEK);
        let mut component = SeasonalComponent::new(weekend, 24, 0.012);
        for week in 0..4 {
            for hour in 0..48 {
                let time = week * WEEK + 2 * DAY + hour * 3600 + 1800;
                component.add(time, 3.0, 1.0);
            }
        }
        component.interpolate(4 * WEEK, true);
        assert!(component.initialized());
        let saturday_noon = 2 * DAY + 12 * 3600;
        assert!((component.value(saturday_noon).0 - 3.0).abs() < 1e-6);
        assert!(component.time().in_window(saturday_noon));
        assert!(!component.time().in_window(5 * DAY));
    }

    #[test]
    fn test_from_proposal_predicts_immediately() {
        let values: Vec<MeanAccumulator> = (0..24)
            .map(|hour| {
                MeanAccumulator::with_sample(
                    (2.0 * std::f64::consts::PI * hour as f64 / 24.0).sin(),
                    3.0,
                )
            })
            .collect();
        let proposal = SeasonalComponentProposal {
            time: SeasonalTime::periodic(DAY),
            initial_values: values,
            annotation: "detected daily seasonality".to_string(),
        };
        let component = SeasonalComponent::from_proposal(&proposal, 24, 0.012, 10 * DAY);
        assert!(component.initialized());
        let (mean, _) = component.value(10 * DAY + 6 * 3600);
        assert!((mean - 1.0).abs() < 0.2, "mean = {mean}");
    }

    #[test]
    fn test_bad_component_detection() {
        let mut component = daily_component();
        assert!(!component.is_bad());
        component.shift_level(f64::INFINITY);
        assert!(component.is_bad());
    }

    #[test]
    fn test_document_round_trip() {
        let component = daily_component();
        let mut writer = DocumentWriter::new();
        component.persist(&mut writer);
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let restored = SeasonalComponent::restore(&reader, component.decay_rate()).unwrap();

        let mut a = Checksummer::new();
        component.checksum(&mut a);
        let mut b = Checksummer::new();
        restored.checksum(&mut b);
        assert_eq!(a.finish(), b.finish());
    }
}
