//! Seasonality detection scheduling.
//!
//! Maintains a short and a long expanding window of preconditioned
//! observations and, on a schedule tied to each window's compression
//! points, hands them to the external seasonality hypothesis search.

use tracing::{error, trace};

use decompose_spi::{
    floor_to, DocumentReader, DocumentWriter, MeanAccumulator, MemoryCircuitBreaker,
    ModelledSeasonality, SearchParams, SeasonalTime, SeasonalitySearch, TimePoint, WindowView,
    DAY, WEEK,
};

use crate::checksum::Checksummer;
use crate::components::{add_mean_zero_normal_noise, ComponentStore};
use crate::expanding_window::ExpandingWindow;
use crate::mediator::{AddValueContext, Message};
use crate::stats::stepwise_propagate;

/// The two test windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    Short = 0,
    Long = 1,
}

/// Window parameterization keyed on the job bucket length.
///
/// The choice trades the number of points in the test against how quickly
/// periodic components are found: fewer points risk false positives, but at
/// long bucket lengths filling a large window takes too long.
struct WindowParameters {
    bucket_length: TimePoint,
    shortest_component: TimePoint,
    number_buckets: usize,
    minimum_resolution: usize,
    bucket_lengths: &'static [TimePoint],
    test_schedule: &'static [TimePoint],
}

#[rustfmt::skip]
const SHORT_WINDOW_PARAMETERS: &[WindowParameters] = &[
    WindowParameters { bucket_length: 1,     shortest_component: 1, number_buckets: 180, minimum_resolution: 10, bucket_lengths: &[1, 5, 10, 30, 60, 300, 600], test_schedule: &[] },
    WindowParameters { bucket_length: 5,     shortest_component: 1, number_buckets: 180, minimum_resolution: 10, bucket_lengths: &[5, 10, 30, 60, 300, 600],    test_schedule: &[] },
    WindowParameters { bucket_length: 10,    shortest_component: 1, number_buckets: 180, minimum_resolution: 10, bucket_lengths: &[10, 30, 60, 300, 600],       test_schedule: &[] },
    WindowParameters { bucket_length: 30,    shortest_component: 1, number_buckets: 180, minimum_resolution: 10, bucket_lengths: &[30, 60, 300, 600],           test_schedule: &[] },
    WindowParameters { bucket_length: 60,    shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[60, 300, 900, 3600, 7200],   test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 300,   shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[300, 900, 3600, 7200],       test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 600,   shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[600, 3600, 7200],            test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 900,   shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[900, 3600, 7200],            test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 1200,  shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[1200, 3600, 7200],           test_schedule: &[3 * 86_400, 3 * 604_800] },
    WindowParameters { bucket_length: 1800,  shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[1800, 3600, 7200],           test_schedule: &[3 * 86_400, 3 * 604_800] },
    WindowParameters { bucket_length: 3600,  shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[3600, 7200],                 test_schedule: &[3 * 86_400, 604_800, 3 * 604_800] },
    WindowParameters { bucket_length: 7200,  shortest_component: 1, number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[7200, 14_400],               test_schedule: &[3 * 86_400, 604_800, 3 * 604_800] },
    WindowParameters { bucket_length: 14_400, shortest_component: 1, number_buckets: 336, minimum_resolution: 6, bucket_lengths: &[14_400],                     test_schedule: &[604_800, 3 * 604_800] },
    WindowParameters { bucket_length: 21_600, shortest_component: 1, number_buckets: 224, minimum_resolution: 6, bucket_lengths: &[21_600],                     test_schedule: &[604_800, 3 * 604_800] },
    WindowParameters { bucket_length: 28_800, shortest_component: 1, number_buckets: 168, minimum_resolution: 6, bucket_lengths: &[28_800],                     test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 43_200, shortest_component: 1, number_buckets: 112, minimum_resolution: 6, bucket_lengths: &[43_200],                     test_schedule: &[4 * 604_800] },
    WindowParameters { bucket_length: 86_400, shortest_component: 1, number_buckets: 56,  minimum_resolution: 6, bucket_lengths: &[86_400],                     test_schedule: &[] },
];

#[rustfmt::skip]
const LONG_WINDOW_PARAMETERS: &[WindowParameters] = &[
    WindowParameters { bucket_length: 1,      shortest_component: 30_601,  number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[900, 3600, 7200],          test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 5,      shortest_component: 30_601,  number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[900, 3600, 7200],          test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 10,     shortest_component: 30_601,  number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[900, 3600, 7200],          test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 30,     shortest_component: 30_601,  number_buckets: 336, minimum_resolution: 12, bucket_lengths: &[900, 3600, 7200],          test_schedule: &[3 * 604_800] },
    WindowParameters { bucket_length: 60,     shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 300,    shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 600,    shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 900,    shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 1200,   shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 1800,   shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 3600,   shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 7200,   shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 14_400, shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 86_400, shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6,  bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
    WindowParameters { bucket_length: 604_800, shortest_component: 648_001, number_buckets: 156, minimum_resolution: 6, bucket_lengths: &[43_200, 86_400, 604_800],  test_schedule: &[104 * 604_800] },
];

/// Whether any seasonality testing happens at this job bucket length.
fn testable_bucket_length(bucket_length: TimePoint) -> bool {
    bucket_length <= 604_800
}

fn window_parameters(kind: WindowKind, bucket_length: TimePoint) -> Option<&'static WindowParameters> {
    let table = match kind {
        WindowKind::Short => SHORT_WINDOW_PARAMETERS,
        WindowKind::Long => LONG_WINDOW_PARAMETERS,
    };
    table.iter().find(|parameters| parameters.bucket_length >= bucket_length)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestState {
    Initial,
    Test,
    NotTesting,
    Error,
}

impl TestState {
    fn name(self) -> &'static str {
        match self {
            TestState::Initial => "INITIAL",
            TestState::Test => "TEST",
            TestState::NotTesting => "NOT_TESTING",
            TestState::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TestSymbol {
    NewValue,
    Reset,
}

#[derive(Debug)]
pub struct SeasonalityTest {
    state: TestState,
    decay_rate: f64,
    bucket_length: TimePoint,
    windows: [Option<ExpandingWindow>; 2],
}

impl SeasonalityTest {
    pub fn new(decay_rate: f64, bucket_length: TimePoint) -> Self {
        let state = if testable_bucket_length(bucket_length) {
            TestState::Initial
        } else {
            TestState::NotTesting
        };
        Self { state, decay_rate, bucket_length, windows: [None, None] }
    }

    fn new_window(&self, kind: WindowKind) -> Option<ExpandingWindow> {
        window_parameters(kind, self.bucket_length).map(|parameters| {
            ExpandingWindow::new(
                self.bucket_length,
                parameters.bucket_lengths.to_vec(),
                parameters.number_buckets,
                self.decay_rate,
            )
        })
    }

    fn initialize_windows(&mut self, time: TimePoint) {
        for kind in [WindowKind::Short, WindowKind::Long] {
            let mut window = self.new_window(kind);
            if let Some(window) = window.as_mut() {
                let step = window.max_bucket_length();
                window.initialize(floor_to(time, step));
            }
            self.windows[kind as usize] = window;
        }
    }

    pub fn handle_add_value(
        &mut self,
        ctx: &AddValueContext,
        components: &ComponentStore,
        search: &dyn SeasonalitySearch,
        breaker: &dyn MemoryCircuitBreaker,
    ) -> Vec<Message> {
        let messages = self.test(ctx, components, search);

        match self.state {
            TestState::Test => {
                // Window memory grows with new values, so stop feeding it
                // under hard memory limit.
                if breaker.allocations_allowed() {
                    let prediction = ctx.seasonal_prediction + ctx.calendar_prediction;
                    for window in self.windows.iter_mut().flatten() {
                        window.add(ctx.time, ctx.value, prediction, ctx.weights.count);
                    }
                }
                messages
            }
            TestState::NotTesting => messages,
            TestState::Initial => {
                self.apply(TestSymbol::NewValue, ctx.time);
                let mut messages = messages;
                messages.extend(self.handle_add_value(ctx, components, search, breaker));
                messages
            }
            TestState::Error => {
                error!("seasonality test in a bad state");
                self.apply(TestSymbol::Reset, ctx.time);
                messages
            }
        }
    }

    fn test(
        &mut self,
        ctx: &AddValueContext,
        components: &ComponentStore,
        search: &dyn SeasonalitySearch,
    ) -> Vec<Message> {
        if self.state != TestState::Test {
            return Vec::new();
        }
        let mut messages = Vec::new();
        for kind in [WindowKind::Short, WindowKind::Long] {
            if !self.should_test(kind, ctx.time) {
                continue;
            }
            let Some(parameters) = window_parameters(kind, self.bucket_length) else {
                continue;
            };
            let Some(window) = self.windows[kind as usize].as_ref() else {
                continue;
            };
            trace!(time = ctx.time, window = kind as usize, "testing for seasonality");

            let minimum_resolution = if window.have_shorter_windows() {
                parameters.minimum_resolution
            } else {
                2
            };
            let testable: Vec<bool> = components
                .seasonal_components()
                .iter()
                .map(|component| {
                    can_test_modelled_component(
                        component.time(),
                        window,
                        parameters.shortest_component,
                        minimum_resolution,
                    )
                })
                .collect();
            let values = window.values_minus_prediction(&mut |time| {
                components.seasonal_masked_prediction(time, &testable)
            });
            let view = WindowView {
                values,
                start_time: window.begin_values_time(),
                bucket_start_time: window.bucket_start_time(),
                bucket_length: window.bucket_length(),
                job_bucket_length: self.bucket_length,
                within_bucket_variance: window.within_bucket_variance(),
            };
            let modelled: Vec<ModelledSeasonality> = components
                .seasonal_components()
                .iter()
                .zip(&testable)
                .map(|(component, &testable)| ModelledSeasonality {
                    time: *component.time(),
                    testable,
                    size: component.size(),
                })
                .collect();
            let params = SearchParams {
                minimum_period: parameters.shortest_component,
                minimum_resolution,
                occupancy: ctx.occupancy,
                maximum_components: components
                    .max_components()
                    .saturating_sub(components.component_count()),
            };

            if let Some(decomposition) = search.decompose(&view, &params, &modelled) {
                if decomposition.components_changed() {
                    messages.push(Message::DetectedSeasonal { time: ctx.time, decomposition });
                }
            }
        }
        messages
    }

    /// Residuals for downstream models when the trend is first used: the
    /// shorter window's values minus the trend, re-noised for averaging.
    pub fn residuals(
        &self,
        predictor: &mut dyn FnMut(TimePoint) -> f64,
        noise_seed: u64,
    ) -> Vec<MeanAccumulator> {
        for window in self.windows.iter().flatten() {
            let mut values = window.values_minus_prediction(predictor);
            add_mean_zero_normal_noise(noise_seed, window.within_bucket_variance(), &mut values);
            return values;
        }
        Vec::new()
    }

    /// Test more often than compression alone would: at coarse bucket
    /// lengths waiting for the window to fill would badly delay finding
    /// short periods.
    fn should_test(&self, kind: WindowKind, time: TimePoint) -> bool {
        let Some(window) = self.windows[kind as usize].as_ref() else {
            return false;
        };
        if window.need_to_compress(time) {
            return true;
        }
        let Some(parameters) = window_parameters(kind, self.bucket_length) else {
            return false;
        };
        let length = time - window.begin_values_time();
        parameters
            .test_schedule
            .iter()
            .any(|&scheduled| length >= scheduled && length < scheduled + self.bucket_length)
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
    }

    pub fn shift_time(&mut self, time: TimePoint, shift: TimePoint) {
        for window in self.windows.iter_mut().flatten() {
            window.shift_time(time, shift);
        }
    }

    pub fn propagate_forwards(&mut self, start: TimePoint, end: TimePoint) {
        if let Some(window) = self.windows[WindowKind::Short as usize].as_mut() {
            stepwise_propagate(start, end, DAY, |time| {
                window.propagate_forwards_by_time(time / 8.0);
            });
        }
        if let Some(window) = self.windows[WindowKind::Long as usize].as_mut() {
            stepwise_propagate(start, end, WEEK, |time| {
                window.propagate_forwards_by_time(time / 8.0);
            });
        }
    }

    fn apply(&mut self, symbol: TestSymbol, time: TimePoint) {
        let old = self.state;
        self.state = match (symbol, self.state) {
            (TestSymbol::NewValue, TestState::Initial | TestState::Test) => TestState::Test,
            (TestSymbol::NewValue, TestState::NotTesting) => TestState::NotTesting,
            (TestSymbol::NewValue, TestState::Error) => TestState::Initial,
            (TestSymbol::Reset, TestState::NotTesting) => TestState::NotTesting,
            (TestSymbol::Reset, _) => TestState::Initial,
        };
        if self.state != old {
            trace!(from = old.name(), to = self.state.name(), "seasonality test transition");
            match self.state {
                TestState::Test => {
                    if self.windows.iter().all(|window| window.is_none()) {
                        self.initialize_windows(time);
                    }
                }
                TestState::Initial => self.initialize_windows(time),
                TestState::NotTesting => {
                    self.windows = [None, None];
                }
                TestState::Error => {}
            }
        }
    }

    pub fn memory_usage(&self) -> usize {
        let mut usage = std::mem::size_of::<Self>();
        for window in self.windows.iter().flatten() {
            usage += window.memory_usage();
        }
        if self.state == TestState::Initial {
            usage += self.extra_memory_on_initialization();
        }
        usage
    }

    /// Worst-case estimate of the memory the windows will claim once
    /// initialized, using a rule-of-thumb 0.3 compression ratio.
    fn extra_memory_on_initialization(&self) -> usize {
        let mut usage = 0;
        for kind in [WindowKind::Short, WindowKind::Long] {
            if let Some(window) = self.new_window(kind) {
                usage += (0.3 * window.memory_usage() as f64) as usize;
            }
        }
        usage
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("version", "6.3");
        writer.field("state", self.state.name());
        if let Some(window) = &self.windows[WindowKind::Short as usize] {
            writer.level("short_window_7_9", |w| window.persist(w));
        }
        if let Some(window) = &self.windows[WindowKind::Long as usize] {
            writer.level("long_window_7_9", |w| window.persist(w));
        }
    }

    /// Restore; unknown versions are silently skipped and the test restarts
    /// from fresh windows.
    pub fn restore(&mut self, reader: &DocumentReader) {
        if reader.value("version") != Some("6.3") {
            return;
        }
        if let Some(state) = match reader.value("state") {
            Some("INITIAL") => Some(TestState::Initial),
            Some("TEST") => Some(TestState::Test),
            Some("NOT_TESTING") => Some(TestState::NotTesting),
            Some("ERROR") => Some(TestState::Error),
            _ => None,
        } {
            self.state = state;
        }
        for (key, kind) in
            [("short_window_7_9", WindowKind::Short), ("long_window_7_9", WindowKind::Long)]
        {
            if let Some(level) = reader.level(key) {
                let mut window = self.new_window(kind);
                if let Some(target) = window.as_mut() {
                    if !target.restore(&level) {
                        window = None;
                    }
                }
                self.windows[kind as usize] = window;
            }
        }
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.str(self.state.name()).f64(self.decay_rate).i64(self.bucket_length);
        for window in &self.windows {
            match window {
                Some(window) => {
                    ck.bool(true);
                    window.checksum(ck);
                }
                None => {
                    ck.bool(false);
                }
            }
        }
    }
}

/// Whether a modelled component can be re-tested from a window at its
/// current resolution.
fn can_test_modelled_component(
    time: &SeasonalTime,
    window: &ExpandingWindow,
    minimum_period: TimePoint,
    minimum_resolution: usize,
) -> bool {
    let period = time.period();
    period >= minimum_period
        && period / window.bucket_length() >= minimum_resolution as TimePoint
        && 2 * period <= window.bucket_length() * window.number_buckets() as TimePoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use decompose_spi::{NoSeasonalitySearch, ObservationWeights, SeasonalDecomposition, UnlimitedMemory};

    fn ctx(time: TimePoint, value: f64) -> AddValueContext {
        AddValueContext {
            time,
            last_time: time - 300,
            time_shift: 0,
            value,
            weights: ObservationWeights::default(),
            occupancy: 1.0,
            first_value_time: 0,
            trend_prediction: 0.0,
            seasonal_prediction: 0.0,
            calendar_prediction: 0.0,
        }
    }

    #[test]
    fn test_window_parameter_lookup() {
        let short = window_parameters(WindowKind::Short, 300).unwrap();
        assert_eq!(short.number_buckets, 336);
        assert_eq!(short.bucket_lengths, &[300, 900, 3600, 7200]);

        let long = window_parameters(WindowKind::Long, 10).unwrap();
        assert_eq!(long.shortest_component, 30_601);

        // Longer than any keyed bucket length: no window.
        assert!(window_parameters(WindowKind::Short, 2 * 604_800).is_none());
    }

    #[test]
    fn test_disabled_for_very_long_buckets() {
        let test = SeasonalityTest::new(0.012, 2 * 604_800);
        assert_eq!(test.state, TestState::NotTesting);
        assert!(testable_bucket_length(604_800));
        assert!(!testable_bucket_length(604_801));
    }

    #[test]
    fn test_initializes_windows_on_first_value() {
        let mut test = SeasonalityTest::new(0.012, 300);
        assert_eq!(test.state, TestState::Initial);
        let components = ComponentStore::new(0.012, 300, 48, 8);
        test.handle_add_value(&ctx(10_000, 1.0), &components, &NoSeasonalitySearch, &UnlimitedMemory);
        assert_eq!(test.state, TestState::Test);
        assert!(test.windows[0].is_some());
        assert!(test.windows[1].is_some());
        // Short window aligned to its longest bucket length.
        assert_eq!(test.windows[0].as_ref().unwrap().begin_values_time(), 7200);
    }

    #[test]
    fn test_memory_breaker_stops_accumulation() {
        struct HardLimit;
        impl MemoryCircuitBreaker for HardLimit {
            fn allocations_allowed(&self) -> bool {
                false
            }
        }
        let mut test = SeasonalityTest::new(0.012, 300);
        let components = ComponentStore::new(0.012, 300, 48, 8);
        test.handle_add_value(&ctx(7500, 1.0), &components, &NoSeasonalitySearch, &HardLimit);
        assert_eq!(test.windows[0].as_ref().unwrap().populated_buckets(), 0);

        test.handle_add_value(&ctx(7800, 1.0), &components, &NoSeasonalitySearch, &UnlimitedMemory);
        assert_eq!(test.windows[0].as_ref().unwrap().populated_buckets(), 1);
    }

    #[test]
    fn test_detection_forwards_message() {
        struct AlwaysFinds;
        impl SeasonalitySearch for AlwaysFinds {
            fn decompose(
                &self,
                window: &WindowView,
                _params: &SearchParams,
                _modelled: &[ModelledSeasonality],
            ) -> Option<SeasonalDecomposition> {
                Some(SeasonalDecomposition {
                    seasonal: vec![decompose_spi::SeasonalComponentProposal {
                        time: SeasonalTime::periodic(DAY),
                        initial_values: Vec::new(),
                        annotation: String::new(),
                    }],
                    seasonal_to_remove_mask: Vec::new(),
                    trend: decompose_spi::TrendProposal {
                        initial_values: Vec::new(),
                        start_time: window.start_time,
                        end_time: window.start_time,
                        bucket_length: window.bucket_length,
                    },
                    within_bucket_variance: 0.0,
                })
            }
        }
        let mut test = SeasonalityTest::new(0.012, 300);
        let components = ComponentStore::new(0.012, 300, 48, 8);
        // Fill past the short window capacity so a compression-triggered
        // test fires.
        let mut messages = Vec::new();
        for i in 0..400 {
            let context = ctx(i * 300, 1.0);
            messages.extend(test.handle_add_value(
                &context,
                &components,
                &AlwaysFinds,
                &UnlimitedMemory,
            ));
        }
        assert!(messages
            .iter()
            .any(|message| matches!(message, Message::DetectedSeasonal { .. })));
    }

    #[test]
    fn test_unknown_restore_version_restarts_fresh() {
        let mut writer = DocumentWriter::new();
        writer.field("version", "6.2");
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let mut test = SeasonalityTest::new(0.012, 300);
        test.restore(&reader);
        assert_eq!(test.state, TestState::Initial);
        assert!(test.windows[0].is_none());
    }

    #[test]
    fn test_document_round_trip() {
        let mut test = SeasonalityTest::new(0.012, 300);
        let components = ComponentStore::new(0.012, 300, 48, 8);
        for i in 0..50 {
            test.handle_add_value(
                &ctx(i * 300, (i % 7) as f64),
                &components,
                &NoSeasonalitySearch,
                &UnlimitedMemory,
            );
        }
        let mut writer = DocumentWriter::new();
        test.persist(&mut writer);
        let doc = writer.finish();
        let reader = DocumentReader::new(&doc).unwrap();
        let mut restored = SeasonalityTest::new(0.012, 300);
        restored.restore(&reader);

        let mut a = Checksummer::new();
        test.checksum(&mut a);
        let mut b = Checksummer::new();
        restored.checksum(&mut b);
        assert_eq!(a.finish(), b.finish());
    }
}
