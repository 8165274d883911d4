//! Calendar component.

use decompose_spi::{CalendarFeature, DocumentReader, DocumentWriter, TimePoint, DAY};

use crate::bucketed::BucketedPeriodicFunction;
use crate::checksum::Checksummer;

/// A component active on the civil days matching a calendar feature.
///
/// The interpolant spans one day; the offset into it is the time of day in
/// the component's time zone.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarComponent {
    feature: CalendarFeature,
    time_zone_offset: TimePoint,
    function: BucketedPeriodicFunction,
}

impl CalendarComponent {
    pub fn new(
        feature: CalendarFeature,
        time_zone_offset: TimePoint,
        size: usize,
        decay_rate: f64,
    ) -> Self {
        Self { feature, time_zone_offset, function: BucketedPeriodicFunction::new(DAY, size, decay_rate) }
    }

    pub fn feature(&self) -> &CalendarFeature {
        &self.feature
    }

    pub fn time_zone_offset(&self) -> TimePoint {
        self.time_zone_offset
    }

    pub fn initialized(&self) -> bool {
        self.function.initialized()
    }

    /// Whether the component contributes at `time`.
    pub fn in_window(&self, time: TimePoint) -> bool {
        self.feature.matches(time, self.time_zone_offset)
    }

    fn offset(&self, time: TimePoint) -> TimePoint {
        (time + self.time_zone_offset).rem_euclid(DAY)
    }

    pub fn add(&mut self, time: TimePoint, value: f64, weight: f64) {
        let offset = self.offset(time);
        self.function.add(time, offset, value, weight);
    }

    pub fn value(&self, time: TimePoint) -> (f64, f64) {
        self.function.value(self.offset(time))
    }

    pub fn mean_value(&self) -> f64 {
        self.function.mean_value()
    }

    pub fn mean_variance(&self) -> f64 {
        self.function.mean_variance()
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

    pub fn is_bad(&self) -> bool {
        self.function.is_bad()
    }

    pub fn size(&self) -> usize {
        self.function.size()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<BucketedPeriodicFunction>()
            + self.function.memory_usage()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        let encoded = match self.feature {
            CalendarFeature::DayOfMonth { day } => ("day_of_month", day, 0),
            CalendarFeature::DaysBeforeEndOfMonth { days } => ("days_before_end", days, 0),
            CalendarFeature::DayOfWeekOfMonth { day_of_week, week } => {
                ("dow_of_month", day_of_week, week)
            }
            CalendarFeature::DayOfWeekBeforeEndOfMonth { day_of_week, weeks } => {
                ("dow_before_end", day_of_week, weeks)
            }
        };
        writer.field("feature", encoded.0);
        writer.field("feature_a", encoded.1);
        writer.field("feature_b", encoded.2);
        writer.field("time_zone_offset", self.time_zone_offset);
        writer.level("function", |w| self.function.persist(w));
    }

    pub fn restore(reader: &DocumentReader, decay_rate: f64) -> Option<Self> {
        let a: u32 = reader.parse("feature_a")?;
        let b: u32 = reader.parse("feature_b")?;
        let feature = match reader.value("feature")? {
            "day_of_month" => CalendarFeature::DayOfMonth { day: a },
            "days_before_end" => CalendarFeature::DaysBeforeEndOfMonth { days: a },
            "dow_of_month" => CalendarFeature::DayOfWeekOfMonth { day_of_week: a, week: b },
            "dow_before_end" => {
                CalendarFeature::DayOfWeekBeforeEndOfMonth { day_of_week: a, weeks: b }
            }
            _ => return None,
        };
        Some(Self {
            feature,
            time_zone_offset: reader.parse("time_zone_offset")?,
            function: BucketedPeriodicFunction::restore(&reader.level("function")?, decay_rate)?,
        })
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.str(&self.feature.to_string()).i64(self.time_zone_offset);
        self.function.checksum(ck);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-01-31 00:00:00 UTC, the last day of January 2021.
    const JAN_31_2021: TimePoint = 1_612_051_200;

    fn month_end_component() -> CalendarComponent {
        let feature = CalendarFeature::DaysBeforeEndOfMonth { days: 0 };
        let mut component = CalendarComponent::new(feature, 0, 12, 0.012);
        // Three month ends: Jan 31, Feb 28, Mar 31 2021.
        for start in [JAN_31_2021, JAN_31_2021 + 28 * DAY, JAN_31_2021 + 59 * DAY] {
            for hour in 0..24 {
                component.add(start + hour * 3600 + 1800, 10.0, 1.0);
            }
        }
        component.interpolate(JAN_31_2021 + 60 * DAY, true);
        component
    }

    #[test]
    fn test_active_only_on_feature_days() {
        let component = month_end_component();
        assert!(component.in_window(JAN_31_2021 + 12 * 3600));
        assert!(!component.in_window(JAN_31_2021 - 12 * 3600));
        // 2021-04-30 is the next month end after March.
        assert!(component.in_window(JAN_31_2021 + 89 * DAY));
    }

    #[test]
    fn test_predicts_feature_level() {
        let component = month_end_component();
        assert!(component.initialized());
        let (mean, _) = component.value(JAN_31_2021 + 89 * DAY + 12 * 3600);
        assert!((mean - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_document_round_trip() {
        let component = month_end_component();
        let mut writer = DocumentWriter::new();
        component.persist(&mut writer);
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let restored = CalendarComponent::restore(&reader, component.decay_rate()).unwrap();

        let mut a = Checksummer::new();
        component.checksum(&mut a);
        let mut b = Checksummer::new();
        restored.checksum(&mut b);
        assert_eq!(a.finish(), b.finish());
        assert_eq!(restored.feature(), component.feature());
    }
}
