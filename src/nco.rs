//! Numerically controlled oscillator.
//!
//! The phase is derived from a sample counter rather than accumulated, so an
//! oscillator that has run for hours is still exactly on its nominal phase.

use num_complex::Complex64;

use crate::error::{require_finite, require_positive, Result};
use crate::math::carrier;

#[derive(Debug, Clone, Default)]
pub struct Nco {
    /// Frequency offset in cycles per sample, `None` until configured
    cycles_per_sample: Option<f64>,
    counter: u64,
}

impl Nco {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling frequency and the oscillator frequency offset (Hz).
    pub fn configure(&mut self, sample_rate: f64, freq_offset: f64) -> Result<()> {
        require_positive("sample_rate", sample_rate)?;
        require_finite("freq_offset", freq_offset)?;
        self.apply(freq_offset / sample_rate);
        Ok(())
    }

    pub(crate) fn apply(&mut self, cycles_per_sample: f64) {
        self.cycles_per_sample = Some(cycles_per_sample);
    }

    pub fn is_configured(&self) -> bool {
        self.cycles_per_sample.is_some()
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Rotator at `counter·2π·f/fs`, then advance.
    pub fn step(&mut self) -> Complex64 {
        let Some(cps) = self.cycles_per_sample else {
            return Complex64::new(0.0, 0.0);
        };
        let out = carrier(cps, self.counter);
        self.counter += 1;
        out
    }

    /// Real cosine output.
    pub fn step_real(&mut self) -> f64 {
        self.step().re
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_unconfigured_is_silent() {
        let mut nco = Nco::new();
        assert_eq!(nco.step(), Complex64::new(0.0, 0.0));
        assert_eq!(nco.counter(), 0);
    }

    #[test]
    fn test_quarter_rate_sequence() {
        let mut nco = Nco::new();
        nco.configure(4.0e6, 1.0e6).unwrap();
        let expected = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0), (1.0, 0.0)];
        for (re, im) in expected {
            let z = nco.step();
            assert_abs_diff_eq!(z.re, re, epsilon = 1e-12);
            assert_abs_diff_eq!(z.im, im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_unit_magnitude_and_reset() {
        let mut nco = Nco::new();
        nco.configure(10.0e6, 1.234e5).unwrap();
        for _ in 0..1000 {
            assert_abs_diff_eq!(nco.step().norm(), 1.0, epsilon = 1e-12);
        }
        nco.reset();
        assert_abs_diff_eq!(nco.step_real(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_offset_rotates_clockwise() {
        let mut nco = Nco::new();
        nco.configure(8.0, -1.0).unwrap();
        nco.step();
        let z = nco.step();
        assert!(z.im < 0.0);
    }

    #[test]
    fn test_bad_configuration_keeps_previous() {
        let mut nco = Nco::new();
        nco.configure(4.0, 1.0).unwrap();
        assert!(nco.configure(0.0, 1.0).is_err());
        nco.step();
        assert_abs_diff_eq!(nco.step().im, 1.0, epsilon = 1e-12);
    }
}
