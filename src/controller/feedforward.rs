//! Open-loop correction phase-locked to one beam harmonic.

use num_complex::Complex64;

use crate::error::{require_finite, require_positive, Result};
use crate::math::deg_to_rad;
use crate::nco::Nco;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedforwardSettings {
    cycles_per_sample: f64,
    /// `amplitude_cal·exp(j·phase_cal)`
    calibration: Complex64,
}

impl FeedforwardSettings {
    pub fn new(
        sample_rate: f64,
        freq_offset: f64,
        amplitude_cal: f64,
        phase_cal_deg: f64,
    ) -> Result<Self> {
        require_positive("sample_rate", sample_rate)?;
        require_finite("freq_offset", freq_offset)?;
        require_finite("amplitude_cal", amplitude_cal)?;
        require_finite("phase_cal_deg", phase_cal_deg)?;
        Ok(Self {
            cycles_per_sample: freq_offset / sample_rate,
            calibration: Complex64::from_polar(amplitude_cal, deg_to_rad(phase_cal_deg)),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedforwardChannel {
    nco: Nco,
    calibration: Option<Complex64>,
}

impl FeedforwardChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(
        &mut self,
        sample_rate: f64,
        freq_offset: f64,
        amplitude_cal: f64,
        phase_cal_deg: f64,
    ) -> Result<()> {
        let settings =
            FeedforwardSettings::new(sample_rate, freq_offset, amplitude_cal, phase_cal_deg)?;
        self.apply(settings);
        Ok(())
    }

    pub(crate) fn apply(&mut self, settings: FeedforwardSettings) {
        self.nco.apply(settings.cycles_per_sample);
        self.calibration = Some(settings.calibration);
    }

    pub fn reset(&mut self) {
        self.nco.reset();
    }

    pub fn step(&mut self) -> Complex64 {
        let Some(cal) = self.calibration else {
            return Complex64::new(0.0, 0.0);
        };
        self.nco.step() * cal
    }
}
