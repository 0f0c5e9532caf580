// Order statistics over per-epoch samples.

/// Median of `values`; the mean of the two middle values for an even count.
///
/// Returns NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Median absolute percentage error of `values` around their median.
///
/// This is the `err%` figure: how far a typical epoch strays from the
/// median, as a fraction of it.
pub fn median_abs_percent_error(values: &[f64]) -> f64 {
    let center = median(values);
    if center == 0.0 || !center.is_finite() {
        return 0.0;
    }

    let errors: Vec<f64> = values
        .iter()
        .map(|v| ((v - center) / center).abs())
        .collect();
    median(&errors)
}
