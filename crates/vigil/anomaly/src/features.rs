//! Descriptive statistics and sliding-window feature vectors.

/// Features per window: mean, std, min, max, median, Q1, Q3, current value.
pub const FEATURE_COUNT: usize = 8;

pub type FeatureVector = [f64; FEATURE_COUNT];

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` delta degrees of freedom (0 = population).
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - ddof) as f64).sqrt()
}

/// Quantile of already sorted data with linear interpolation between
/// closest ranks. `p` is clamped to `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Feature vector for one window. The last value is the point being scored.
pub fn window_features(window: &[f64]) -> FeatureVector {
    let sorted = sorted_copy(window);
    [
        mean(window),
        std_dev(window, 0),
        sorted.first().copied().unwrap_or(0.0),
        sorted.last().copied().unwrap_or(0.0),
        quantile_sorted(&sorted, 0.5),
        quantile_sorted(&sorted, 0.25),
        quantile_sorted(&sorted, 0.75),
        window.last().copied().unwrap_or(0.0),
    ]
}

/// One feature vector per point from index `window_size - 1` onwards.
///
/// The vector at position `i` describes the series point at
/// `i + window_size - 1`. A series shorter than the window yields nothing.
pub fn sliding_features(values: &[f64], window_size: usize) -> Vec<FeatureVector> {
    if window_size == 0 || values.len() < window_size {
        return Vec::new();
    }
    values.windows(window_size).map(window_features).collect()
}
