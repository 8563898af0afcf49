//! Scenario files.
//!
//! A scenario bundles the cavity, the loop settings, the setpoint and the
//! beam harmonics handled by notch and feedforward. It is read from TOML;
//! every field has a default, so a file only lists what it changes.

use std::path::Path;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::cavity::CavityParameters;
use crate::controller::{ControllerParameters, FEEDFORWARD_CAPACITY, NOTCH_CAPACITY};
use crate::error::{require_finite, BlcError, Result};
use crate::harmonics::{
    feedforward_descriptors, notch_descriptors, FeedforwardHarmonic, NotchHarmonic,
};
use crate::math::deg_to_rad;
use crate::sim::DEFAULT_CAPTURE_LEN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub demod_window: usize,
    pub loop_phase_deg: f64,
    pub kp: f64,
    /// Integral gain (1/s)
    pub ki: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            demod_window: 4,
            loop_phase_deg: 0.0,
            kp: 10.0,
            ki: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetpointSettings {
    /// Cavity voltage amplitude (V)
    pub amplitude: f64,
    pub phase_deg: f64,
}

impl Default for SetpointSettings {
    fn default() -> Self {
        Self {
            amplitude: 1.0e6,
            phase_deg: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub cavity: CavityParameters,
    #[serde(rename = "loop")]
    pub loop_settings: LoopSettings,
    pub setpoint: SetpointSettings,
    /// Samples simulated by a batch run
    pub steps: usize,
    /// Samples per published waveform window
    pub capture_len: usize,
    pub feedback_enabled: bool,
    pub feedforward_enabled: bool,
    pub notch: Vec<NotchHarmonic>,
    pub feedforward: Vec<FeedforwardHarmonic>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            cavity: CavityParameters::default(),
            loop_settings: LoopSettings::default(),
            setpoint: SetpointSettings::default(),
            steps: 10_000,
            capture_len: DEFAULT_CAPTURE_LEN,
            feedback_enabled: true,
            feedforward_enabled: false,
            notch: Vec::new(),
            feedforward: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: ScenarioConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.cavity.validate()?;
        self.controller_parameters()?
            .validate(NOTCH_CAPACITY, FEEDFORWARD_CAPACITY)?;
        require_finite("setpoint.amplitude", self.setpoint.amplitude)?;
        require_finite("setpoint.phase_deg", self.setpoint.phase_deg)?;
        if self.capture_len == 0 {
            return Err(BlcError::invalid("capture_len", "must be at least 1"));
        }
        Ok(())
    }

    /// Controller parameters sharing the cavity's rates.
    pub fn controller_parameters(&self) -> Result<ControllerParameters> {
        let fb = self.cavity.bunch_rate;
        Ok(ControllerParameters {
            bunch_rate: fb,
            sample_rate: self.cavity.sample_rate,
            if_freq: self.cavity.if_freq,
            demod_window: self.loop_settings.demod_window,
            loop_phase_deg: self.loop_settings.loop_phase_deg,
            kp: self.loop_settings.kp,
            ki: self.loop_settings.ki,
            notches: notch_descriptors(fb, &self.notch)?,
            feedforward: feedforward_descriptors(fb, &self.feedforward)?,
        })
    }

    pub fn setpoint(&self) -> Complex64 {
        Complex64::from_polar(
            self.setpoint.amplitude,
            deg_to_rad(self.setpoint.phase_deg),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_reference_scenario() {
        let cfg = ScenarioConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ScenarioConfig::default());
        let ctrl = cfg.controller_parameters().unwrap();
        assert_eq!(ctrl, ControllerParameters::default());
        assert_eq!(cfg.setpoint(), Complex64::new(1.0e6, 0.0));
    }

    #[test]
    fn test_parses_sections_and_harmonics() {
        let raw = r#"
            steps = 500
            feedforward_enabled = true

            [cavity]
            bunch_rate = 1.0e3
            sample_rate = 4.0e6
            if_freq = 5.0e5
            noise_psd = -inf

            [loop]
            ki = 2.5e4

            [[notch]]
            harmonic = 1
            gain = 1.0
            half_bandwidth = 100.0

            [[feedforward]]
            harmonic = 2
            amplitude = 3.0
        "#;
        let cfg = ScenarioConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.steps, 500);
        assert!(cfg.cavity.noise_psd.is_infinite());
        assert_eq!(cfg.loop_settings.kp, 10.0);
        assert_eq!(cfg.loop_settings.ki, 2.5e4);

        let ctrl = cfg.controller_parameters().unwrap();
        assert_eq!(ctrl.notches.len(), 2);
        assert_eq!(ctrl.notches[1].freq_offset, -1.0e3);
        assert_eq!(ctrl.feedforward[0].freq_offset, 2.0e3);
        assert_eq!(ctrl.feedforward[0].phase_cal_deg, 0.0);
    }

    #[test]
    fn test_rejects_invalid_scenarios() {
        assert!(ScenarioConfig::from_toml_str("[loop]\ndemod_window = 0").is_err());
        assert!(ScenarioConfig::from_toml_str("capture_len = 0").is_err());
        assert!(matches!(
            ScenarioConfig::from_toml_str("steps = \"many\""),
            Err(BlcError::Toml(_))
        ));
        let dup = r#"
            [[notch]]
            harmonic = 2
            gain = 1.0
            half_bandwidth = 100.0
            [[notch]]
            harmonic = 2
            gain = 1.0
            half_bandwidth = 100.0
        "#;
        assert!(ScenarioConfig::from_toml_str(dup).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ScenarioConfig::from_toml_file(Path::new("/nonexistent/blc.toml")).unwrap_err();
        assert!(matches!(err, BlcError::Io(_)));
    }
}
