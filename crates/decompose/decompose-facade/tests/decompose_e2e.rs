//! End-to-end scenarios for the online decomposition.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use decompose_facade::{
    DecompositionConfig, DocumentReader, DocumentWriter, Observation, TimePoint,
    TimeSeriesDecomposition, DAY, HOUR, WEEK,
};

fn new_decomposition(bucket_length: TimePoint) -> TimeSeriesDecomposition {
    TimeSeriesDecomposition::new(
        DecompositionConfig::new(0.012, bucket_length).with_rng_seed(7),
    )
}

fn noise(rng: &mut StdRng, sigma: f64) -> f64 {
    Normal::new(0.0, sigma).map_or(0.0, |normal| normal.sample(rng))
}

/// Saturday and Sunday in an epoch-anchored week (the epoch is a Thursday).
fn is_weekend(time: TimePoint) -> bool {
    let offset = time.rem_euclid(WEEK);
    (2 * DAY..4 * DAY).contains(&offset)
}

#[test]
fn test_daily_sinusoid_is_detected_and_tracked() {
    // Ten days of five-minute buckets of a daily sinusoid. A seasonal
    // component with period one day appears within three days and the
    // prediction tracks the signal over the last day.
    let mut rng = StdRng::seed_from_u64(1);
    let mut decomposition = new_decomposition(300);
    let clean =
        |time: TimePoint| 10.0 * (1.0 + (2.0 * std::f64::consts::PI * time as f64 / DAY as f64).sin());

    let mut detection_time = None;
    for i in 0..(10 * DAY / 300) {
        let time = i * 300;
        decomposition.add_point(Observation::new(time, clean(time) + noise(&mut rng, 0.1)));
        if detection_time.is_none() && !decomposition.seasonal_components().is_empty() {
            detection_time = Some(time);
        }
    }

    let detection_time = detection_time.expect("daily seasonality detected");
    assert!(detection_time <= 4 * DAY, "detected late at {detection_time}");
    assert_eq!(decomposition.seasonal_components().len(), 1);
    assert_eq!(decomposition.seasonal_components()[0].time().period(), DAY);

    let mut squared_error = 0.0;
    let mut buckets = 0;
    for i in (9 * DAY / 300)..(10 * DAY / 300) {
        let time = i * 300;
        let error = decomposition.predict(time, 0.0).mean - clean(time);
        squared_error += error * error;
        buckets += 1;
    }
    let rmse = (squared_error / buckets as f64).sqrt();
    assert!(rmse < 0.5, "rmse over the last day {rmse}");
}

#[test]
fn test_level_shift_is_applied() {
    // Two weeks at five then two weeks at twenty-five. A level shift is
    // detected and applied within two days of the shift and the prediction
    // converges on the new level.
    let mut rng = StdRng::seed_from_u64(2);
    let annotations: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&annotations);
    let mut decomposition = TimeSeriesDecomposition::builder(
        DecompositionConfig::new(0.012, HOUR).with_rng_seed(7),
    )
    .on_annotation(move |note| sink.borrow_mut().push(note.to_string()))
    .build();

    let shift_time = 14 * DAY;
    let mut applied_at = None;
    for i in 0..(28 * DAY / HOUR) {
        let time = i * HOUR;
        let level = if time < shift_time { 5.0 } else { 25.0 };
        decomposition.add_point(Observation::new(time, level + noise(&mut rng, 1.0)));
        if applied_at.is_none()
            && annotations.borrow().iter().any(|note| note.contains("level shift"))
        {
            applied_at = Some(time);
        }
    }

    let applied_at = applied_at.expect("level shift detected");
    assert!(
        applied_at <= shift_time + 2 * DAY,
        "level shift applied late at {applied_at}"
    );

    // The prediction lands near the new level immediately and converges as
    // the new regime is re-learned.
    let prediction = decomposition.predict(applied_at + 12 * HOUR, 0.0).mean;
    assert!((prediction - 25.0).abs() < 6.0, "prediction {prediction}");
    let settled = decomposition.predict(28 * DAY, 0.0).mean;
    assert!((settled - 25.0).abs() < 2.0, "settled prediction {settled}");
}

#[test]
fn test_transient_spike_leaves_no_persistent_change() {
    // A one-day excursion to fifty on a baseline of five. Whatever the
    // change machinery does with it, after reversion no persistent change
    // remains.
    let mut rng = StdRng::seed_from_u64(3);
    let mut decomposition = new_decomposition(HOUR);
    for i in 0..(21 * DAY / HOUR) {
        let time = i * HOUR;
        let in_spike = (7 * DAY..8 * DAY).contains(&time);
        let level = if in_spike { 50.0 } else { 5.0 };
        decomposition.add_point(Observation::new(time, level + noise(&mut rng, 0.5)));
    }

    let prediction = decomposition.predict(21 * DAY, 0.0).mean;
    let residual = 5.0 - prediction;
    assert!(
        !decomposition.using_trend_for_prediction() || residual.abs() < 3.0,
        "persistent change: prediction {prediction}"
    );
}

#[test]
fn test_weekday_weekend_partition() {
    // Six weeks of hourly data: ten on weekdays, three at weekends. A
    // windowed partition appears and predicts each regime.
    let mut rng = StdRng::seed_from_u64(4);
    let mut decomposition = new_decomposition(HOUR);
    for i in 0..(6 * WEEK / HOUR) {
        let time = i * HOUR;
        let level = if is_weekend(time) { 3.0 } else { 10.0 };
        decomposition.add_point(Observation::new(time, level + noise(&mut rng, 0.2)));
    }

    assert!(
        decomposition.seasonal_components().iter().any(|component| component
            .time()
            .is_windowed()),
        "no windowed components detected"
    );

    // Saturday noon and Wednesday noon of the following week.
    let saturday_noon = 6 * WEEK + 2 * DAY + 12 * HOUR;
    let wednesday_noon = 6 * WEEK + 6 * DAY + 12 * HOUR;
    assert!(is_weekend(saturday_noon));
    assert!(!is_weekend(wednesday_noon));

    let weekend_prediction = decomposition.predict(saturday_noon, 0.0).mean;
    let weekday_prediction = decomposition.predict(wednesday_noon, 0.0).mean;
    assert!(
        (weekend_prediction - 3.0).abs() < 1.0,
        "weekend prediction {weekend_prediction}"
    );
    assert!(
        (weekday_prediction - 10.0).abs() < 1.0,
        "weekday prediction {weekday_prediction}"
    );
}

#[test]
fn test_month_end_calendar_feature() {
    // Six months of hourly data with value ten on the last day of each
    // month: the last-day feature is detected and its component predicts
    // the excursion at later month ends.
    // 2021-01-01 00:00:00 UTC.
    const JAN_1_2021: TimePoint = 1_609_459_200;
    let last_day = decompose_facade::CalendarFeature::DaysBeforeEndOfMonth { days: 0 };

    let mut rng = StdRng::seed_from_u64(5);
    let mut decomposition = new_decomposition(HOUR);
    for i in 0..(181 * DAY / HOUR) {
        let time = JAN_1_2021 + i * HOUR;
        let level = if last_day.matches(time, 0) { 10.0 } else { 1.0 };
        decomposition.add_point(Observation::new(time, level + noise(&mut rng, 0.1)));
    }

    assert!(
        decomposition
            .calendar_components()
            .iter()
            .any(|component| *component.feature() == last_day),
        "last-day feature not modelled"
    );

    // 2021-07-31 12:00 UTC, the next month end after the feed.
    let july_31_noon = JAN_1_2021 + 211 * DAY + 12 * HOUR;
    assert!(last_day.matches(july_31_noon, 0));
    let prediction = decomposition.predict(july_31_noon, 0.0).mean;
    assert!(prediction > 5.0, "month-end prediction {prediction}");
}

#[test]
fn test_save_restore_stays_in_lockstep() {
    // Persist and restore mid-ingestion, then verify the two copies keep
    // identical checksums over the next thousand buckets.
    let clean =
        |time: TimePoint| 10.0 * (1.0 + (2.0 * std::f64::consts::PI * time as f64 / DAY as f64).sin());
    let mut rng = StdRng::seed_from_u64(6);
    let mut original = new_decomposition(300);

    let mut values = Vec::new();
    for i in 0..3000 {
        let time = i * 300;
        values.push((time, clean(time) + noise(&mut rng, 0.1)));
    }
    for &(time, value) in values.iter().take(1000) {
        original.add_point(Observation::new(time, value));
    }

    let mut writer = DocumentWriter::new();
    original.persist(&mut writer);
    let document = writer.finish();
    let mut restored = new_decomposition(300);
    restored.restore(&DocumentReader::new(&document).unwrap()).unwrap();
    assert_eq!(original.checksum(), restored.checksum());

    for (step, &(time, value)) in values.iter().enumerate().skip(1000) {
        original.add_point(Observation::new(time, value));
        restored.add_point(Observation::new(time, value));
        if step % 100 == 0 {
            assert_eq!(original.checksum(), restored.checksum(), "diverged at bucket {step}");
        }
    }
    assert_eq!(original.checksum(), restored.checksum());
}
