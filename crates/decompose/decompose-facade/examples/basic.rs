//! Basic decomposition usage: feed a noisy daily signal, watch the model
//! annotations, and query predictions.

use decompose_facade::{
    DecompositionConfig, Observation, TimeSeriesDecomposition, DAY,
};

fn main() {
    let config = DecompositionConfig::new(0.012, 300).with_rng_seed(42);
    let mut decomposition = TimeSeriesDecomposition::builder(config)
        .on_annotation(|note| println!("model: {note}"))
        .build();

    // Ten days of five-minute buckets of a daily pattern.
    for i in 0..(10 * DAY / 300) {
        let time = i * 300;
        let value = 10.0
            + 5.0 * (2.0 * std::f64::consts::PI * time as f64 / DAY as f64).sin()
            + 0.2 * ((i % 13) as f64 - 6.0);
        decomposition.add_point(Observation::new(time, value));
    }

    for component in decomposition.seasonal_components() {
        println!(
            "seasonal component: period {}s, initialized {}",
            component.time().period(),
            component.initialized()
        );
    }

    let time = 10 * DAY + 6 * 3600;
    let prediction = decomposition.predict(time, 0.95);
    println!(
        "prediction at +6h: {:.2} [{:.2}, {:.2}]",
        prediction.mean, prediction.lower, prediction.upper
    );
    println!("residual for 18.0: {:.2}", decomposition.detrend(time, 18.0, 0.0));
}
