//! RF cavity driven at IF and loaded by a bunched beam.
//!
//! The cavity voltage is tracked as a baseband phasor relative to the RF
//! carrier. Each sample the IF drive is downconverted, the phasor is advanced
//! by a single-pole recursion, a beam kick is added once per bunch period and
//! the result is upconverted back to IF with multiplicative measurement
//! noise.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use tracing::debug;

use crate::error::{require_finite, require_positive, BlcError, Result};
use crate::math::{carrier, deg_to_rad};
use crate::noise::{NoiseGenerator, NoiseSpec, NOISE_BLOCK_LEN};

/// Physical and sampling parameters of the cavity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CavityParameters {
    /// RF frequency (Hz)
    pub frf: f64,
    /// Shunt impedance over quality factor (Ω)
    pub r_over_q: f64,
    pub loaded_q: f64,
    /// Resonance detuning from `frf` (Hz)
    pub detuning: f64,
    /// Charge per bunch (C)
    pub bunch_charge: f64,
    /// Bunch repetition rate (Hz)
    pub bunch_rate: f64,
    /// Beam phase (deg)
    pub beam_phase_deg: f64,
    /// Sampling frequency (Hz)
    pub sample_rate: f64,
    /// IF frequency (Hz)
    pub if_freq: f64,
    /// Relative measurement noise level (dB/Hz); `-inf` disables noise
    pub noise_psd: f64,
    pub noise_seed: u64,
}

impl Default for CavityParameters {
    fn default() -> Self {
        Self {
            frf: 650.0e6,
            r_over_q: 106.5,
            loaded_q: 1.5e5,
            detuning: 0.0,
            bunch_charge: 2.234e-8,
            bunch_rate: 1.0e6,
            beam_phase_deg: 0.0,
            sample_rate: 10.0e6,
            if_freq: 1.0e6,
            noise_psd: -135.0,
            noise_seed: 1,
        }
    }
}

impl CavityParameters {
    pub fn validate(&self) -> Result<()> {
        CavityConstants::derive(self).map(|_| ())
    }

    pub fn noise_spec(&self) -> NoiseSpec {
        NoiseSpec::flat(self.noise_psd, self.sample_rate, self.noise_seed)
    }
}

/// Quantities derived from [`CavityParameters`] once per `configure`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CavityConstants {
    /// Sampling period (s)
    pub ts: f64,
    /// IF frequency in cycles per sample
    pub if_cycles: f64,
    /// Resonance angular frequency `w0 = wc + dw` (rad/s)
    pub w0: f64,
    /// Half bandwidth `w0 / 2QL` (rad/s)
    pub wh: f64,
    /// Loaded shunt impedance `R/Q · QL` (Ω)
    pub rl: f64,
    /// Damped resonance `sqrt(w0² - wh²)` (rad/s)
    pub w0p: f64,
    /// Offset of the damped resonance from the carrier (rad/s)
    pub dwl: f64,
    /// Samples between bunches, `floor(fs / fb)`
    pub bunch_period: u64,
    /// `1 - Ts·(wh - j·dwl)`
    pub pole: Complex64,
    /// `wh·Ts`
    pub drive_gain: f64,
    /// Phasor step added at every bunch passage (V)
    pub kick: Complex64,
}

impl CavityConstants {
    pub fn derive(p: &CavityParameters) -> Result<Self> {
        require_positive("sample_rate", p.sample_rate)?;
        require_positive("bunch_rate", p.bunch_rate)?;
        require_positive("loaded_q", p.loaded_q)?;
        require_finite("frf", p.frf)?;
        require_finite("r_over_q", p.r_over_q)?;
        require_finite("detuning", p.detuning)?;
        require_finite("bunch_charge", p.bunch_charge)?;
        require_finite("beam_phase_deg", p.beam_phase_deg)?;
        require_finite("if_freq", p.if_freq)?;
        if p.noise_psd.is_nan() || p.noise_psd == f64::INFINITY {
            return Err(BlcError::invalid(
                "noise_psd",
                format!("must be finite or -inf, got {}", p.noise_psd),
            ));
        }

        let ratio = (p.sample_rate / p.bunch_rate).floor();
        if ratio < 1.0 {
            return Err(BlcError::invalid(
                "bunch_rate",
                format!(
                    "{} Hz exceeds the sample rate {} Hz",
                    p.bunch_rate, p.sample_rate
                ),
            ));
        }

        let ts = 1.0 / p.sample_rate;
        let wc = TAU * p.frf;
        let w0 = wc + TAU * p.detuning;
        let wh = w0 / (2.0 * p.loaded_q);
        if w0 <= 0.0 || w0 <= wh {
            return Err(BlcError::invalid(
                "loaded_q",
                format!(
                    "resonance at {} Hz is overdamped with QL = {}",
                    p.frf + p.detuning,
                    p.loaded_q
                ),
            ));
        }
        let rl = p.r_over_q * p.loaded_q;
        let w0p = (w0 * w0 - wh * wh).sqrt();
        let gl = Complex64::new(1.0, wh / w0p);
        let dwl = w0p - wc;
        let kick = 2.0
            * wh
            * rl
            * p.bunch_charge
            * gl
            * Complex64::from_polar(1.0, PI - deg_to_rad(p.beam_phase_deg));

        Ok(Self {
            ts,
            if_cycles: p.if_freq * ts,
            w0,
            wh,
            rl,
            w0p,
            dwl,
            bunch_period: ratio as u64,
            pole: Complex64::new(1.0 - ts * wh, ts * dwl),
            drive_gain: wh * ts,
            kick,
        })
    }
}

/// One cavity sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CavityOutput {
    /// Baseband cavity voltage phasor (V)
    pub vc: Complex64,
    /// Measured IF cavity voltage, noise included
    pub vc_if: f64,
    /// IF drive that produced this sample
    pub drive_if: f64,
    /// Reflected IF signal `vc_if - drive_if`
    pub vr_if: f64,
}

struct Configured {
    params: CavityParameters,
    constants: CavityConstants,
    noise: NoiseGenerator,
}

pub struct CavityModel {
    config: Option<Configured>,
    vc: Complex64,
    counter: u64,
    kicks: u64,
    noise_block: Vec<f64>,
}

impl Default for CavityModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CavityModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CavityModel")
            .field("params", &self.parameters())
            .field("vc", &self.vc)
            .field("counter", &self.counter)
            .field("kicks", &self.kicks)
            .finish_non_exhaustive()
    }
}

impl CavityModel {
    pub fn new() -> Self {
        Self {
            config: None,
            vc: Complex64::new(0.0, 0.0),
            counter: 0,
            kicks: 0,
            noise_block: vec![0.0; NOISE_BLOCK_LEN],
        }
    }

    /// Apply a parameter set. On error the model is left exactly as it was.
    ///
    /// The phasor and sample counter carry over a reconfiguration; the
    /// current noise block is kept until the next block boundary.
    pub fn configure(&mut self, params: &CavityParameters) -> Result<()> {
        let constants = CavityConstants::derive(params)?;
        let noise = NoiseGenerator::new(params.noise_spec(), NOISE_BLOCK_LEN)?;

        debug!(
            bunch_period = constants.bunch_period,
            half_bandwidth_hz = constants.wh / TAU,
            loaded_r = constants.rl,
            kick_v = constants.kick.norm(),
            "cavity configured"
        );
        self.config = Some(Configured {
            params: params.clone(),
            constants,
            noise,
        });
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn parameters(&self) -> Option<&CavityParameters> {
        self.config.as_ref().map(|c| &c.params)
    }

    pub fn constants(&self) -> Option<&CavityConstants> {
        self.config.as_ref().map(|c| &c.constants)
    }

    /// Last baseband voltage phasor.
    pub fn voltage(&self) -> Complex64 {
        self.vc
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Beam kicks applied since the last reset.
    pub fn kicks(&self) -> u64 {
        self.kicks
    }

    pub fn noise_block(&self) -> &[f64] {
        &self.noise_block
    }

    /// Zero the phasor and counters and restart the noise sequence from
    /// `noise_seed`.
    pub fn reset(&mut self) {
        let Some(cfg) = self.config.as_mut() else {
            return;
        };
        cfg.noise.reseed(cfg.params.noise_seed);
        self.vc = Complex64::new(0.0, 0.0);
        self.counter = 0;
        self.kicks = 0;
    }

    pub fn step(&mut self, drive_if: f64) -> CavityOutput {
        let Some(cfg) = self.config.as_mut() else {
            return CavityOutput::default();
        };
        let c = &cfg.constants;

        let slot = (self.counter % NOISE_BLOCK_LEN as u64) as usize;
        if slot == 0 {
            cfg.noise.generate(&mut self.noise_block);
        }

        let lo = carrier(c.if_cycles, self.counter);
        let vf = 2.0 * drive_if * lo.conj();
        let mut vc = c.pole * self.vc + c.drive_gain * vf;
        if self.counter % c.bunch_period == 0 {
            vc += c.kick;
            self.kicks += 1;
        }

        let vc_if = (vc * lo).re * (1.0 + self.noise_block[slot]);
        self.vc = vc;
        self.counter += 1;

        CavityOutput {
            vc,
            vc_if,
            drive_if,
            vr_if: vc_if - drive_if,
        }
    }
}
