//! Numeric helpers for the aggregation engine.
//!
//! Every helper returns `None` instead of a non-finite value so that NaN never
//! reaches a chart.

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// `part / total`, or `None` when `total` is zero.
pub fn ratio(part: f64, total: f64) -> Option<f64> {
    if total == 0.0 {
        return None;
    }
    finite(part / total)
}

/// Arithmetic mean. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Clamps `value` into `[lo, hi]` and reports whether it had to move.
pub fn clamp(value: f64, lo: f64, hi: f64) -> (f64, bool) {
    if value < lo {
        (lo, true)
    } else if value > hi {
        (hi, true)
    } else {
        (value, false)
    }
}

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
