//! Narrowband resonant feedback around a beam-harmonic offset.
//!
//! The stage integrates error energy close to `carrier + freq_offset` with
//! bandwidth `half_bw`, leaving the loop gain elsewhere untouched. It is the
//! discrete form of `gain·wh / (s + wh - j·wn)`, discretised either with the
//! explicit Euler step or the bilinear transform.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::FeedbackStage;
use crate::error::{require_finite, require_positive, BlcError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotchDiscretization {
    /// `vo = (1 - Ts·(wh - j·wn))·vo + gain·wh·Ts·e`
    #[default]
    Euler,
    /// Bilinear transform prewarped at the offset frequency.
    Bilinear,
}

/// `vo[n] = pole·vo[n-1] + b0·e[n] + b1·e[n-1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotchCoefficients {
    pole: Complex64,
    b0: Complex64,
    b1: Complex64,
}

impl NotchCoefficients {
    /// Explicit Euler coefficients.
    pub fn new(sample_rate: f64, half_bw: f64, freq_offset: f64, gain: f64) -> Result<Self> {
        Self::with_discretization(
            sample_rate,
            half_bw,
            freq_offset,
            gain,
            NotchDiscretization::Euler,
        )
    }

    pub fn with_discretization(
        sample_rate: f64,
        half_bw: f64,
        freq_offset: f64,
        gain: f64,
        method: NotchDiscretization,
    ) -> Result<Self> {
        require_positive("sample_rate", sample_rate)?;
        require_positive("half_bandwidth", half_bw)?;
        require_finite("freq_offset", freq_offset)?;
        require_finite("gain", gain)?;

        let ts = 1.0 / sample_rate;
        let wh = TAU * half_bw;
        let wn = TAU * freq_offset;
        let zero = Complex64::new(0.0, 0.0);

        let coeffs = match method {
            NotchDiscretization::Euler => Self {
                pole: Complex64::new(1.0 - ts * wh, ts * wn),
                b0: Complex64::new(gain * wh * ts, 0.0),
                b1: zero,
            },
            NotchDiscretization::Bilinear => {
                // prewarped so the resonance lands exactly on `freq_offset`
                let k = if wn == 0.0 {
                    2.0 / ts
                } else {
                    wn / (wn * ts / 2.0).tan()
                };
                let a = Complex64::new(wh, -wn);
                let b = gain * wh / (k + a);
                Self {
                    pole: (k - a) / (k + a),
                    b0: b,
                    b1: b,
                }
            }
        };

        // the Euler update diverges unless (Ts·wn)² < 2·Ts·wh - (Ts·wh)²
        if coeffs.pole.norm() >= 1.0 {
            return Err(BlcError::invalid(
                "half_bandwidth",
                format!(
                    "{half_bw} Hz is too narrow for a {freq_offset} Hz offset at {sample_rate} Hz \
                     (pole magnitude {:.9})",
                    coeffs.pole.norm()
                ),
            ));
        }
        Ok(coeffs)
    }

    pub fn pole(&self) -> Complex64 {
        self.pole
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotchResonator {
    coeffs: Option<NotchCoefficients>,
    vo: Complex64,
    last_error: Complex64,
}

impl NotchResonator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(
        &mut self,
        sample_rate: f64,
        half_bw: f64,
        freq_offset: f64,
        gain: f64,
    ) -> Result<()> {
        let coeffs = NotchCoefficients::new(sample_rate, half_bw, freq_offset, gain)?;
        self.apply(coeffs);
        Ok(())
    }

    pub(crate) fn apply(&mut self, coeffs: NotchCoefficients) {
        self.coeffs = Some(coeffs);
    }

    pub fn output(&self) -> Complex64 {
        self.vo
    }
}

impl FeedbackStage for NotchResonator {
    fn step(&mut self, error: Complex64) -> Complex64 {
        let Some(c) = self.coeffs else {
            return Complex64::new(0.0, 0.0);
        };
        self.vo = c.pole * self.vo + c.b0 * error + c.b1 * self.last_error;
        self.last_error = error;
        self.vo
    }

    fn reset(&mut self) {
        self.vo = Complex64::new(0.0, 0.0);
        self.last_error = Complex64::new(0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::carrier;
    use approx::assert_relative_eq;

    const FS: f64 = 1.0e6;

    /// Peak output magnitude over the last quarter of a run driven by a
    /// unit tone at `tone` Hz.
    fn steady_state_gain(notch: &mut NotchResonator, tone: f64, samples: u64) -> f64 {
        notch.reset();
        let mut peak = 0.0f64;
        for n in 0..samples {
            let out = notch.step(carrier(tone / FS, n));
            if n > samples * 3 / 4 {
                peak = peak.max(out.norm());
            }
        }
        peak
    }

    #[test]
    fn test_unity_gain_at_notch_frequency() {
        let mut notch = NotchResonator::new();
        notch.configure(FS, 100.0, 500.0, 1.0).unwrap();
        let g = steady_state_gain(&mut notch, 500.0, 40_000);
        assert_relative_eq!(g, 1.0, max_relative = 0.02);
    }

    #[test]
    fn test_selective_against_offset_tone() {
        let mut notch = NotchResonator::new();
        notch.configure(FS, 100.0, 500.0, 4.0).unwrap();
        let on = steady_state_gain(&mut notch, 500.0, 40_000);
        // ten half-bandwidths away
        let off = steady_state_gain(&mut notch, 1500.0, 40_000);
        assert!(on > 5.0 * off, "on={on} off={off}");
    }

    #[test]
    fn test_pole_inside_unit_circle() {
        let c = NotchCoefficients::new(FS, 50.0, 1.0e3, 1.0).unwrap();
        assert!(c.pole().norm() < 1.0);
    }

    #[test]
    fn test_rejects_divergent_offset() {
        let err = NotchCoefficients::new(FS, 50.0, 1.0e5, 1.0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bilinear_handles_far_offsets() {
        // the same resonator that the Euler step cannot realise
        let coeffs = NotchCoefficients::with_discretization(
            FS,
            50.0,
            1.0e5,
            1.0,
            NotchDiscretization::Bilinear,
        )
        .unwrap();
        let mut notch = NotchResonator::new();
        notch.apply(coeffs);
        let on = steady_state_gain(&mut notch, 1.0e5, 40_000);
        let off = steady_state_gain(&mut notch, 1.1e5, 40_000);
        assert_relative_eq!(on, 1.0, max_relative = 0.02);
        assert!(on > 20.0 * off, "on={on} off={off}");
    }

    #[test]
    fn test_rejects_non_positive_bandwidth() {
        let mut notch = NotchResonator::new();
        assert!(notch.configure(FS, 0.0, 0.0, 1.0).is_err());
        assert_eq!(
            notch.step(Complex64::new(1.0, 0.0)),
            Complex64::new(0.0, 0.0)
        );
    }
}
