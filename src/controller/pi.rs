//! Proportional-integral feedback stage.

use num_complex::Complex64;

use super::FeedbackStage;
use crate::error::{require_finite, require_positive, Result};

/// Validated PI gains. `ki` is in 1/s; the integrator step is `ki·Ts`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiGains {
    pub kp: f64,
    pub ki: f64,
    sample_period: f64,
}

impl PiGains {
    pub fn new(kp: f64, ki: f64, sample_rate: f64) -> Result<Self> {
        require_finite("kp", kp)?;
        require_finite("ki", ki)?;
        require_positive("sample_rate", sample_rate)?;
        Ok(Self {
            kp,
            ki,
            sample_period: 1.0 / sample_rate,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PiController {
    gains: Option<PiGains>,
    integrator: Complex64,
}

impl PiController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, kp: f64, ki: f64, sample_rate: f64) -> Result<()> {
        let gains = PiGains::new(kp, ki, sample_rate)?;
        self.apply(gains);
        Ok(())
    }

    pub(crate) fn apply(&mut self, gains: PiGains) {
        self.gains = Some(gains);
    }

    pub fn gains(&self) -> Option<PiGains> {
        self.gains
    }

    pub fn integrator(&self) -> Complex64 {
        self.integrator
    }
}

impl FeedbackStage for PiController {
    fn step(&mut self, error: Complex64) -> Complex64 {
        let Some(g) = self.gains else {
            return Complex64::new(0.0, 0.0);
        };
        self.integrator += g.ki * g.sample_period * error;
        g.kp * error + self.integrator
    }

    fn reset(&mut self) {
        self.integrator = Complex64::new(0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_proportional_only() {
        let mut pi = PiController::new();
        pi.configure(10.0, 0.0, 1.0e6).unwrap();
        let out = pi.step(Complex64::new(1.0, -2.0));
        assert_eq!(out, Complex64::new(10.0, -20.0));
        assert_eq!(pi.integrator(), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_integrator_scales_with_sample_period() {
        // the same Ki integrates the same amount per second at any sample rate
        let mut slow = PiController::new();
        let mut fast = PiController::new();
        slow.configure(0.0, 100.0, 1.0e3).unwrap();
        fast.configure(0.0, 100.0, 1.0e4).unwrap();
        let e = Complex64::new(1.0, 0.0);
        let mut a = Complex64::new(0.0, 0.0);
        let mut b = Complex64::new(0.0, 0.0);
        for _ in 0..1000 {
            a = slow.step(e);
        }
        for _ in 0..10_000 {
            b = fast.step(e);
        }
        assert_abs_diff_eq!(a.re, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.re, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reset_clears_integrator() {
        let mut pi = PiController::new();
        pi.configure(1.0, 1.0e3, 1.0e3).unwrap();
        pi.step(Complex64::new(1.0, 1.0));
        pi.reset();
        assert_eq!(pi.integrator(), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_unconfigured_outputs_zero() {
        let mut pi = PiController::new();
        assert_eq!(pi.step(Complex64::new(5.0, 0.0)), Complex64::new(0.0, 0.0));
        assert!(pi.configure(1.0, f64::NAN, 1.0).is_err());
        assert!(pi.gains().is_none());
    }
}
