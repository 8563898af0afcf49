//! Shared numeric helpers: carrier phases, unit conversions, spread.

use num_complex::Complex64;
use std::f64::consts::TAU;

/// Unit rotator `exp(j·2π·cycles_per_sample·counter)`.
///
/// The phase is reduced to one cycle before the trig evaluation, so the
/// result does not drift as the counter grows.
#[inline]
pub fn carrier(cycles_per_sample: f64, counter: u64) -> Complex64 {
    let cycles = (cycles_per_sample * counter as f64).fract();
    Complex64::from_polar(1.0, TAU * cycles)
}

#[inline]
pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

/// `10^(db/10)`; `-inf` maps to zero.
#[inline]
pub fn db_to_power(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

#[inline]
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    20.0 * amplitude.max(f64::MIN_POSITIVE).log10()
}

/// Peak-to-peak spread of a real series.
pub fn spread(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        0.0
    } else {
        hi - lo
    }
}
