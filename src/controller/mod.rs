//! LLRF controller bank.
//!
//! Demodulates the cavity IF signal, forms the error against a setpoint,
//! sums PI and notch feedback with NCO feedforward and re-modulates the sum
//! to an IF drive sample. Notch and feedforward slots are preallocated; a
//! reconfiguration only moves the active prefix.

pub mod demod;
pub mod feedforward;
pub mod notch;
pub mod pi;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{require_finite, require_positive, BlcError, Result};
use crate::math::{carrier, deg_to_rad};

pub use demod::DemodWindow;
pub use feedforward::{FeedforwardChannel, FeedforwardSettings};
pub use notch::{NotchCoefficients, NotchDiscretization, NotchResonator};
pub use pi::{PiController, PiGains};

/// Highest beam harmonic the bank is dimensioned for.
pub const MAX_BEAM_HARMONICS: usize = 10;
/// Notch slots: one per sign of each beam harmonic.
pub const NOTCH_CAPACITY: usize = 2 * MAX_BEAM_HARMONICS;
pub const FEEDFORWARD_CAPACITY: usize = MAX_BEAM_HARMONICS;

/// A feedback stage driven by the complex loop error.
pub trait FeedbackStage {
    fn step(&mut self, error: Complex64) -> Complex64;
    fn reset(&mut self);
}

fn step_all<S: FeedbackStage>(stages: &mut [S], error: Complex64) -> Complex64 {
    stages.iter_mut().map(|s| s.step(error)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchDescriptor {
    /// Offset from the carrier (Hz)
    pub freq_offset: f64,
    /// Half bandwidth (Hz)
    pub half_bandwidth: f64,
    pub gain: f64,
    #[serde(default)]
    pub discretization: NotchDiscretization,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardDescriptor {
    /// Offset from the carrier (Hz)
    pub freq_offset: f64,
    pub amplitude_cal: f64,
    pub phase_cal_deg: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerParameters {
    /// Bunch repetition rate (Hz)
    pub bunch_rate: f64,
    /// Sampling frequency (Hz)
    pub sample_rate: f64,
    /// IF frequency (Hz)
    pub if_freq: f64,
    /// Number of samples averaged by the demodulator
    pub demod_window: usize,
    /// Loop phase correction applied to the demodulated voltage (deg)
    pub loop_phase_deg: f64,
    pub kp: f64,
    /// Integral gain (1/s)
    pub ki: f64,
    pub notches: Vec<NotchDescriptor>,
    pub feedforward: Vec<FeedforwardDescriptor>,
}

impl Default for ControllerParameters {
    fn default() -> Self {
        Self {
            bunch_rate: 1.0e6,
            sample_rate: 10.0e6,
            if_freq: 1.0e6,
            demod_window: 4,
            loop_phase_deg: 0.0,
            kp: 10.0,
            ki: 0.0,
            notches: Vec::new(),
            feedforward: Vec::new(),
        }
    }
}

impl ControllerParameters {
    /// Check every field against a bank of the given capacities.
    pub fn validate(&self, notch_capacity: usize, feedforward_capacity: usize) -> Result<()> {
        BankSettings::build(self, notch_capacity, feedforward_capacity).map(|_| ())
    }
}

/// Everything `configure` needs, fully validated before the bank is touched.
struct BankSettings {
    if_cycles: f64,
    loop_rotator: Complex64,
    demod_window: usize,
    pi: PiGains,
    notches: Vec<NotchCoefficients>,
    feedforward: Vec<FeedforwardSettings>,
}

impl BankSettings {
    fn build(
        params: &ControllerParameters,
        notch_capacity: usize,
        feedforward_capacity: usize,
    ) -> Result<Self> {
        require_positive("sample_rate", params.sample_rate)?;
        require_positive("bunch_rate", params.bunch_rate)?;
        require_finite("if_freq", params.if_freq)?;
        require_finite("loop_phase_deg", params.loop_phase_deg)?;
        if params.demod_window < 1 {
            return Err(BlcError::invalid("demod_window", "must be at least 1"));
        }
        if params.notches.len() > notch_capacity {
            return Err(BlcError::CapacityExceeded {
                bank: "notch",
                requested: params.notches.len(),
                capacity: notch_capacity,
            });
        }
        if params.feedforward.len() > feedforward_capacity {
            return Err(BlcError::CapacityExceeded {
                bank: "feedforward",
                requested: params.feedforward.len(),
                capacity: feedforward_capacity,
            });
        }

        let fs = params.sample_rate;
        let notches = params
            .notches
            .iter()
            .map(|n| {
                NotchCoefficients::with_discretization(
                    fs,
                    n.half_bandwidth,
                    n.freq_offset,
                    n.gain,
                    n.discretization,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let feedforward = params
            .feedforward
            .iter()
            .map(|f| FeedforwardSettings::new(fs, f.freq_offset, f.amplitude_cal, f.phase_cal_deg))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            if_cycles: params.if_freq / fs,
            loop_rotator: Complex64::from_polar(1.0, deg_to_rad(params.loop_phase_deg)),
            demod_window: params.demod_window,
            pi: PiGains::new(params.kp, params.ki, fs)?,
            notches,
            feedforward,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerOutput {
    /// Demodulated, loop-phase corrected cavity voltage estimate
    pub vc: Complex64,
    /// IF drive sample for the cavity
    pub drive_if: f64,
}

#[derive(Debug, Clone)]
pub struct ControllerBank {
    params: Option<ControllerParameters>,
    if_cycles: f64,
    loop_rotator: Complex64,
    window: DemodWindow,
    pi: PiController,
    notches: Vec<NotchResonator>,
    feedforward: Vec<FeedforwardChannel>,
    active_notches: usize,
    active_feedforward: usize,
    counter: u64,
}

impl Default for ControllerBank {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerBank {
    pub fn new() -> Self {
        Self::with_capacity(NOTCH_CAPACITY, FEEDFORWARD_CAPACITY)
    }

    pub fn with_capacity(notch_capacity: usize, feedforward_capacity: usize) -> Self {
        Self {
            params: None,
            if_cycles: 0.0,
            loop_rotator: Complex64::new(1.0, 0.0),
            window: DemodWindow::new(1),
            pi: PiController::new(),
            notches: vec![NotchResonator::new(); notch_capacity],
            feedforward: vec![FeedforwardChannel::new(); feedforward_capacity],
            active_notches: 0,
            active_feedforward: 0,
            counter: 0,
        }
    }

    /// Apply a parameter set. On error the bank is left exactly as it was.
    pub fn configure(&mut self, params: &ControllerParameters) -> Result<()> {
        let settings =
            BankSettings::build(params, self.notch_capacity(), self.feedforward_capacity())?;

        let first = self.params.is_none();
        if first || self.window.depth() != settings.demod_window {
            self.window = DemodWindow::new(settings.demod_window);
        }
        self.if_cycles = settings.if_cycles;
        self.loop_rotator = settings.loop_rotator;
        self.pi.apply(settings.pi);

        let n_notch = settings.notches.len();
        for (idx, (slot, coeffs)) in self.notches.iter_mut().zip(settings.notches).enumerate() {
            slot.apply(coeffs);
            if idx >= self.active_notches {
                slot.reset();
            }
        }
        let n_ff = settings.feedforward.len();
        for (idx, (slot, ff)) in self
            .feedforward
            .iter_mut()
            .zip(settings.feedforward)
            .enumerate()
        {
            slot.apply(ff);
            if idx >= self.active_feedforward {
                slot.reset();
            }
        }
        self.active_notches = n_notch;
        self.active_feedforward = n_ff;
        self.params = Some(params.clone());

        debug!(
            notches = n_notch,
            feedforward = n_ff,
            demod_window = settings.demod_window,
            kp = params.kp,
            ki = params.ki,
            "controller bank configured"
        );
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.params.is_some()
    }

    pub fn parameters(&self) -> Option<&ControllerParameters> {
        self.params.as_ref()
    }

    pub fn notch_capacity(&self) -> usize {
        self.notches.len()
    }

    pub fn feedforward_capacity(&self) -> usize {
        self.feedforward.len()
    }

    pub fn active_notches(&self) -> usize {
        self.active_notches
    }

    pub fn active_feedforward(&self) -> usize {
        self.active_feedforward
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Demodulation window contents, oldest first.
    pub fn demod_contents(&self) -> impl Iterator<Item = &Complex64> + '_ {
        self.window.iter()
    }

    pub fn reset(&mut self) {
        if self.params.is_none() {
            return;
        }
        self.window.clear();
        self.counter = 0;
        self.pi.reset();
        for slot in &mut self.notches[..self.active_notches] {
            slot.reset();
        }
        for slot in &mut self.feedforward[..self.active_feedforward] {
            slot.reset();
        }
    }

    /// One controller sample. Feedback and feedforward stages always
    /// advance; the enables only gate their contribution to the drive.
    pub fn step(
        &mut self,
        vc_if: f64,
        setpoint: Complex64,
        fb_enabled: bool,
        ff_enabled: bool,
    ) -> ControllerOutput {
        if self.params.is_none() {
            return ControllerOutput::default();
        }

        let lo = carrier(self.if_cycles, self.counter);
        self.window.push(2.0 * vc_if * lo.conj());
        let vc = self.window.mean() * self.loop_rotator;

        let error = setpoint - vc;
        let fb_sum = self.pi.step(error) + step_all(&mut self.notches[..self.active_notches], error);
        let ff_sum: Complex64 = self.feedforward[..self.active_feedforward]
            .iter_mut()
            .map(FeedforwardChannel::step)
            .sum();

        let mut actuation = Complex64::new(0.0, 0.0);
        if fb_enabled {
            actuation += fb_sum;
        }
        if ff_enabled {
            actuation += ff_sum;
        }
        let drive_if = (actuation * lo).re;

        self.counter += 1;
        ControllerOutput { vc, drive_if }
    }
}
