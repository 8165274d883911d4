//! Change-point detection on the residual stream.
//!
//! Watches `value - prediction` in a ring buffer of window buckets and
//! proposes level shifts, scale changes, and trend onsets. Applied changes
//! stay undoable until they are either confirmed by enough evidence or
//! backed out.

mod detect;

use std::collections::VecDeque;

use tracing::{debug, error, trace};

use decompose_spi::{
    floor_to, DocumentReader, DocumentWriter, MeanAccumulator, MeanVarAccumulator, TimePoint, DAY,
    HOUR,
};

use crate::checksum::Checksummer;
use crate::components::ComponentStore;
use crate::mediator::{AddValueContext, Message};
use crate::stats::{self, stepwise_propagate};

pub use detect::{
    ChangePoint, ChangePointKind, OutlierWeightDerate, TestForChange, TestableChanges,
    UndoableChangePoint,
};

/// Count weight applied while a candidate change is suspected.
const CHANGE_COUNT_WEIGHT: f64 = 0.1;
/// Window buckets never get shorter than this.
const MINIMUM_WINDOW_BUCKET_LENGTH: TimePoint = HOUR;
/// Fraction of the window treated as outliers, scaled by occupancy.
const OUTLIER_FRACTION: f64 = 0.1;

const TIME_SENTINEL: TimePoint = TimePoint::MIN / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestState {
    Test,
    NotTesting,
    Error,
}

impl TestState {
    fn name(self) -> &'static str {
        match self {
            TestState::Test => "TEST",
            TestState::NotTesting => "NOT_TESTING",
            TestState::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TestSymbol {
    Disable,
    Reset,
}

#[derive(Debug)]
pub struct ChangePointTest {
    state: TestState,
    decay_rate: f64,
    bucket_length: TimePoint,
    window: VecDeque<MeanAccumulator>,
    mean_offset: MeanAccumulator,
    residual_moments: MeanVarAccumulator,
    large_error_fraction: f64,
    total_count_weight_adjustment: f64,
    minimum_total_count_weight_adjustment: f64,
    last_test_time: TimePoint,
    last_change_point_time: TimePoint,
    last_candidate_change_point_time: TimePoint,
    undoable_last_change: Option<UndoableChangePoint>,
    last_change_outlier_weight_derate: OutlierWeightDerate,
}

impl ChangePointTest {
    pub fn new(decay_rate: f64, bucket_length: TimePoint) -> Self {
        let mut result = Self {
            state: TestState::Test,
            decay_rate,
            bucket_length,
            window: VecDeque::new(),
            mean_offset: MeanAccumulator::new(),
            residual_moments: MeanVarAccumulator::new(),
            large_error_fraction: 0.0,
            total_count_weight_adjustment: 0.0,
            minimum_total_count_weight_adjustment: 0.0,
            last_test_time: TIME_SENTINEL,
            last_change_point_time: TIME_SENTINEL,
            last_candidate_change_point_time: TIME_SENTINEL,
            undoable_last_change: None,
            last_change_outlier_weight_derate: OutlierWeightDerate::default(),
        };
        result.window = result.empty_window();
        result
    }

    fn empty_window(&self) -> VecDeque<MeanAccumulator> {
        let mut window = VecDeque::with_capacity(self.window_size());
        window.resize(self.window_size(), MeanAccumulator::new());
        window
    }

    pub fn window_bucket_length(&self) -> TimePoint {
        MINIMUM_WINDOW_BUCKET_LENGTH.max(self.bucket_length)
    }

    fn window_size(&self) -> usize {
        ((4 * DAY / self.window_bucket_length()) as usize).max(32)
    }

    fn start_of_window_bucket(&self, time: TimePoint) -> TimePoint {
        floor_to(time, self.window_bucket_length())
    }

    /// Transient changes tend to last a day; waiting thirty hours leaves a
    /// margin to see a revert before committing. Sparse data waits longer
    /// since it carries less information per unit time.
    pub fn minimum_change_length(&self, occupancy: f64) -> TimePoint {
        let length = (30 * HOUR).max(5 * self.window_bucket_length());
        let length = ((1.0 / occupancy).min(2.0) * length as f64 + 0.5) as TimePoint;
        decompose_spi::ceil_to(length, self.window_bucket_length())
    }

    pub fn maximum_interval_to_detect_change(&self, occupancy: f64) -> TimePoint {
        5 * self.minimum_change_length(occupancy) / 3
    }

    /// The adjusted count weight for component updates at `time`. Small
    /// while a candidate change is suspected; made up afterwards so the
    /// weight integrates to one over any detection interval.
    pub fn count_weight(&self, _time: TimePoint) -> f64 {
        if self.total_count_weight_adjustment > self.minimum_total_count_weight_adjustment
            && self.large_error_fraction > 0.25
        {
            return CHANGE_COUNT_WEIGHT;
        }
        1.0 + (-self.total_count_weight_adjustment).min(1.0)
    }

    /// How much outlier down-weighting should be relaxed for an error of
    /// the given size, fading over three days since the last change.
    pub fn outlier_weight_derate(&self, time: TimePoint, error: f64) -> f64 {
        (1.0 - (time - self.last_change_point_time) as f64 / (3 * DAY) as f64).max(0.0)
            * self.last_change_outlier_weight_derate.value(error)
    }

    pub fn handle_add_value(
        &mut self,
        ctx: &AddValueContext,
        components: &ComponentStore,
        noise_seed: u64,
    ) -> Vec<Message> {
        match self.state {
            TestState::Test => {
                let steps = (((self.start_of_window_bucket(ctx.time)
                    - self.start_of_window_bucket(ctx.last_time))
                    / self.window_bucket_length()) as usize)
                    .min(self.window.len());
                for _ in 0..steps {
                    self.window.pop_front();
                    self.window.push_back(MeanAccumulator::new());
                }
                if let Some(bucket) = self.window.back_mut() {
                    bucket.add(ctx.value, ctx.weights.count);
                }
                self.mean_offset
                    .add((ctx.time.rem_euclid(self.bucket_length)) as f64, ctx.weights.count);
                self.residual_moments
                    .add(ctx.value - ctx.prediction(), ctx.weights.update);
                self.update_total_count_weights(ctx);
                self.test_for_candidate_change(ctx);
                let mut messages = Vec::new();
                messages.extend(self.test_undo_last_change(ctx));
                messages.extend(self.test_for_change(ctx, components, noise_seed));
                messages
            }
            TestState::NotTesting => Vec::new(),
            TestState::Error => {
                error!("change point test in a bad state");
                self.apply(TestSymbol::Reset, ctx.time);
                Vec::new()
            }
        }
    }

    /// New seasonality invalidates the accumulated residual statistics.
    pub fn handle_detected_seasonal(&mut self, time: TimePoint) {
        for bucket in &mut self.window {
            *bucket = MeanAccumulator::new();
        }
        self.residual_moments = MeanVarAccumulator::new();
        self.large_error_fraction = 0.0;
        self.total_count_weight_adjustment = 0.0;
        self.minimum_total_count_weight_adjustment = 0.0;
        self.last_candidate_change_point_time =
            time - 4 * self.maximum_interval_to_detect_change(1.0);
    }

    pub fn disable(&mut self, time: TimePoint) {
        self.apply(TestSymbol::Disable, time);
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
    }

    fn update_total_count_weights(&mut self, ctx: &AddValueContext) {
        self.total_count_weight_adjustment += (ctx.time - ctx.last_time) as f64
            / self.bucket_length as f64
            * (self.count_weight(ctx.time) - 1.0);
        self.total_count_weight_adjustment = self.total_count_weight_adjustment.min(0.0);
        if self.total_count_weight_adjustment == 0.0 {
            self.minimum_total_count_weight_adjustment = (CHANGE_COUNT_WEIGHT - 1.0)
                * self.maximum_interval_to_detect_change(ctx.occupancy) as f64
                / self.bucket_length as f64;
        }
        if self.total_count_weight_adjustment < self.minimum_total_count_weight_adjustment {
            self.minimum_total_count_weight_adjustment = 0.0;
        }
    }

    fn test_for_candidate_change(&mut self, ctx: &AddValueContext) {
        // Startup is prone to false positives before seasonality is
        // modelled; the most common seasonality is daily so wait for a few
        // repeats.
        if ctx.time < ctx.first_value_time + 3 * DAY {
            return;
        }
        let error = (ctx.value - ctx.prediction()).abs();
        let beta = self.bucket_length as f64 / (4.0 * self.window_bucket_length() as f64);
        let alpha = 1.0 - beta;
        let may_have_changed_before = self.may_have_changed();
        self.large_error_fraction = alpha * self.large_error_fraction
            + beta * if error > self.large_error() { 1.0 } else { 0.0 };
        if self.may_have_changed()
            && !may_have_changed_before
            && ctx.time
                > self.last_candidate_change_point_time
                    + 2 * self.maximum_interval_to_detect_change(ctx.occupancy)
        {
            self.last_candidate_change_point_time = ctx.time;
        }
        trace!(
            large_error_fraction = self.large_error_fraction,
            error,
            "candidate change update"
        );
    }

    fn test_undo_last_change(&mut self, ctx: &AddValueContext) -> Option<Message> {
        let minimum_change_length = self.minimum_change_length(ctx.occupancy);
        let undoable = self.undoable_last_change.as_mut()?;
        undoable.add(
            ctx.time - ctx.time_shift,
            ctx.value,
            ctx.weights.count,
            ctx.prediction(),
        );

        if ctx.time - self.last_change_point_time > minimum_change_length / 10
            && undoable.should_undo()
        {
            let change = undoable.to_undo_change();
            debug!(%change, "undoing change");
            self.undoable_last_change = None;
            self.last_change_outlier_weight_derate = OutlierWeightDerate::default();
            return Some(Message::DetectedChangePoint { time: ctx.time, change });
        }

        if ctx.time - self.last_change_point_time
            > self.maximum_interval_to_detect_change(ctx.occupancy)
        {
            self.undoable_last_change = None;
        }
        None
    }

    fn test_for_change(
        &mut self,
        ctx: &AddValueContext,
        components: &ComponentStore,
        noise_seed: u64,
    ) -> Option<Message> {
        if !self.should_test(ctx.time, ctx.occupancy) {
            return None;
        }

        let begin = self.window.iter().position(|bucket| bucket.count() > 0.0)?;
        let length = self.window.len() - begin;
        if self.window_bucket_length() * length as TimePoint
            <= self.minimum_change_length(ctx.occupancy)
        {
            return None;
        }

        let testable = if components.has_seasonal() {
            TestableChanges::All
        } else {
            TestableChanges::LevelShift
        };
        let buckets_start_time = self.start_of_window_bucket(ctx.time)
            - (length as TimePoint - 1) * self.window_bucket_length();
        let values_start_time = buckets_start_time + self.window_bucket_length() / 2;
        let values: Vec<MeanAccumulator> = self.window.iter().skip(begin).copied().collect();

        let mut predictor = |time: TimePoint| components.prediction(time);
        let change = TestForChange::new(
            testable,
            values_start_time - ctx.time_shift,
            self.window_bucket_length(),
            &mut predictor,
            values,
            OUTLIER_FRACTION * ctx.occupancy,
        )
        .test();
        self.last_test_time = ctx.time;

        match change {
            Some(mut change)
                if change.large_enough(self.large_error())
                    && change.long_enough(ctx.time, self.minimum_change_length(ctx.occupancy)) =>
            {
                debug!(%change, time = ctx.time, "detected change");
                // Restore the variance smoothed away by window-bucket
                // averaging before downstream models refit on these.
                crate::components::add_mean_zero_normal_noise(
                    noise_seed,
                    self.residual_moments.variance(),
                    change.residuals_mut(),
                );
                self.large_error_fraction = 0.0;
                self.last_change_point_time = ctx.time;
                self.last_candidate_change_point_time = self
                    .last_candidate_change_point_time
                    .min(ctx.time - self.maximum_interval_to_detect_change(ctx.occupancy));
                self.undoable_last_change = Some(change.undoable());
                self.last_change_outlier_weight_derate = change.outlier_weight_derate();
                Some(Message::DetectedChangePoint { time: ctx.time, change })
            }
            Some(change) => {
                trace!(%change, "change too small or too recent");
                self.last_candidate_change_point_time = change.time();
                None
            }
            None => None,
        }
    }

    fn may_have_changed(&self) -> bool {
        self.large_error_fraction > 0.5
    }

    fn large_error(&self) -> f64 {
        3.0 * self.residual_moments.variance().sqrt()
    }

    fn should_test(&self, time: TimePoint, occupancy: f64) -> bool {
        self.undoable_last_change.is_none()
            && ((time > self.last_test_time + self.minimum_change_length(occupancy))
                || (time > self.last_test_time + 3 * self.window_bucket_length()
                    && time
                        < self.last_candidate_change_point_time
                            + self.maximum_interval_to_detect_change(occupancy)
                    && time
                        > self.last_candidate_change_point_time
                            + self.minimum_change_length(occupancy)))
    }

    fn apply(&mut self, symbol: TestSymbol, _time: TimePoint) {
        let old = self.state;
        self.state = match (symbol, self.state) {
            (TestSymbol::Disable, TestState::Test | TestState::NotTesting) => TestState::NotTesting,
            (TestSymbol::Disable, TestState::Error) => TestState::Error,
            (TestSymbol::Reset, TestState::Test | TestState::Error) => TestState::Test,
            (TestSymbol::Reset, TestState::NotTesting) => TestState::NotTesting,
        };
        if self.state != old {
            trace!(from = old.name(), to = self.state.name(), "change point test transition");
            match self.state {
                TestState::Test => {
                    self.window = self.empty_window();
                    self.mean_offset = MeanAccumulator::new();
                    self.large_error_fraction = 0.0;
                }
                TestState::NotTesting => {
                    self.window = VecDeque::new();
                    self.mean_offset = MeanAccumulator::new();
                    self.large_error_fraction = 0.0;
                }
                TestState::Error => {}
            }
        }
    }

    pub fn propagate_forwards(&mut self, start: TimePoint, end: TimePoint) {
        let decay_rate = self.decay_rate;
        let residual_moments = &mut self.residual_moments;
        stepwise_propagate(start, end, DAY, |time| {
            residual_moments.age((-decay_rate * time / 8.0).exp());
        });
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.window.capacity() * std::mem::size_of::<MeanAccumulator>()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("version", "7.11");
        writer.field("state", self.state.name());
        stats::persist_mean(writer, "mean_offset", &self.mean_offset);
        stats::persist_mean_var(writer, "residual_moments", &self.residual_moments);
        writer.field("large_error_fraction", self.large_error_fraction);
        writer.field("total_count_weight_adjustment", self.total_count_weight_adjustment);
        writer.field(
            "minimum_total_count_weight_adjustment",
            self.minimum_total_count_weight_adjustment,
        );
        writer.field("last_test_time", self.last_test_time);
        writer.field("last_change_point_time", self.last_change_point_time);
        writer.field(
            "last_candidate_change_point_time",
            self.last_candidate_change_point_time,
        );
        for bucket in &self.window {
            writer.level("bucket", |w| {
                w.field("count", bucket.count());
                w.field("mean", bucket.mean());
            });
        }
        if let Some(undoable) = &self.undoable_last_change {
            writer.level("last_change_point", |w| undoable.persist(w));
        }
        // Version 8.3.
        writer.level("outlier_weight_derate", |w| {
            self.last_change_outlier_weight_derate.persist(w)
        });
    }

    pub fn restore(&mut self, reader: &DocumentReader) -> bool {
        if reader.value("version") != Some("7.11") {
            return false;
        }
        self.state = match reader.value("state") {
            Some("TEST") => TestState::Test,
            Some("NOT_TESTING") => TestState::NotTesting,
            Some("ERROR") => TestState::Error,
            _ => return false,
        };
        let (Some(mean_offset), Some(residual_moments)) = (
            stats::restore_mean(reader, "mean_offset"),
            stats::restore_mean_var(reader, "residual_moments"),
        ) else {
            return false;
        };
        self.mean_offset = mean_offset;
        self.residual_moments = residual_moments;
        let (Some(fraction), Some(total), Some(minimum)) = (
            reader.parse("large_error_fraction"),
            reader.parse("total_count_weight_adjustment"),
            reader.parse("minimum_total_count_weight_adjustment"),
        ) else {
            return false;
        };
        self.large_error_fraction = fraction;
        self.total_count_weight_adjustment = total;
        self.minimum_total_count_weight_adjustment = minimum;
        let (Some(last_test), Some(last_change), Some(last_candidate)) = (
            reader.parse("last_test_time"),
            reader.parse("last_change_point_time"),
            reader.parse("last_candidate_change_point_time"),
        ) else {
            return false;
        };
        self.last_test_time = last_test;
        self.last_change_point_time = last_change;
        self.last_candidate_change_point_time = last_candidate;

        let mut window = VecDeque::with_capacity(self.window_size());
        for level in reader.levels("bucket") {
            match (level.parse("count"), level.parse("mean")) {
                (Some(count), Some(mean)) => {
                    window.push_back(MeanAccumulator::from_parts(count, mean));
                }
                _ => return false,
            }
        }
        if self.state == TestState::Test && window.len() != self.window_size() {
            return false;
        }
        self.window = window;

        self.undoable_last_change = reader
            .level("last_change_point")
            .and_then(|level| UndoableChangePoint::restore(&level));
        self.last_change_outlier_weight_derate = reader
            .level("outlier_weight_derate")
            .and_then(|level| OutlierWeightDerate::restore(&level))
            .unwrap_or_default();
        true
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.str(self.state.name()).f64(self.decay_rate).i64(self.bucket_length);
        for bucket in &self.window {
            stats::checksum_mean(ck, bucket);
        }
        stats::checksum_mean(ck, &self.mean_offset);
        stats::checksum_mean_var(ck, &self.residual_moments);
        ck.f64(self.large_error_fraction)
            .f64(self.total_count_weight_adjustment)
            .f64(self.minimum_total_count_weight_adjustment)
            .i64(self.last_test_time)
            .i64(self.last_change_point_time)
            .i64(self.last_candidate_change_point_time);
        if let Some(undoable) = &self.undoable_last_change {
            undoable.checksum(ck);
        }
        self.last_change_outlier_weight_derate.checksum(ck);
    }
}
