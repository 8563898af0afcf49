//! Closed-loop simulation harness.
//!
//! [`SimulationContext`] owns one cavity and one controller bank and closes
//! the loop with a single-sample delay: the drive computed by the controller
//! for sample `n` feeds the cavity at sample `n + 1`. [`SimulationDriver`]
//! runs a shared context on its own thread, taking the context lock once per
//! sample pair so that configuration and inspection can interleave with the
//! running loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use num_complex::Complex64;
use tracing::{error, info, warn};

use crate::cavity::{CavityConstants, CavityModel, CavityOutput};
use crate::config::ScenarioConfig;
use crate::controller::{ControllerBank, ControllerOutput};
use crate::error::{BlcError, Result};
use crate::spectrum::Spectrum;

/// Samples per published waveform window.
pub const DEFAULT_CAPTURE_LEN: usize = 1 << 15;

/// Sleep between polls while the shared context is not configured.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// One closed-loop sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopSample {
    /// Simulation time of the sample (s)
    pub time: f64,
    pub cavity: CavityOutput,
    pub controller: ControllerOutput,
}

/// A completed capture window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveforms {
    /// Measured IF cavity voltage
    pub vc_if: Vec<f64>,
    /// Amplitude of the demodulated cavity voltage (V)
    pub amplitude: Vec<f64>,
    /// Phase of the demodulated cavity voltage (deg)
    pub phase_deg: Vec<f64>,
    /// Sample times (s)
    pub time: Vec<f64>,
}

impl Waveforms {
    fn with_capacity(n: usize) -> Self {
        Self {
            vc_if: Vec::with_capacity(n),
            amplitude: Vec::with_capacity(n),
            phase_deg: Vec::with_capacity(n),
            time: Vec::with_capacity(n),
        }
    }

    fn clear(&mut self) {
        self.vc_if.clear();
        self.amplitude.clear();
        self.phase_deg.clear();
        self.time.clear();
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Amplitude spectrum of the IF cavity voltage.
    pub fn spectrum(&self, sample_rate: f64) -> Result<Spectrum> {
        Spectrum::from_signal(&self.vc_if, sample_rate)
    }
}

/// Records loop waveforms into a fixed window and publishes each full window.
#[derive(Debug, Clone)]
pub struct WaveformCapture {
    window: usize,
    current: Waveforms,
    latest: Option<Waveforms>,
    published: u64,
}

impl WaveformCapture {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            current: Waveforms::with_capacity(window),
            latest: None,
            published: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Samples recorded into the window being filled.
    pub fn filled(&self) -> usize {
        self.current.len()
    }

    /// Most recently completed window.
    pub fn latest(&self) -> Option<&Waveforms> {
        self.latest.as_ref()
    }

    /// Number of windows completed so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Append one sample; returns true when it completed a window.
    pub fn record(&mut self, vc_if: f64, vc: Complex64, time: f64) -> bool {
        self.current.vc_if.push(vc_if);
        self.current.amplitude.push(vc.norm());
        self.current.phase_deg.push(vc.arg().to_degrees());
        self.current.time.push(time);
        if self.current.len() < self.window {
            return false;
        }

        // reuse the previous snapshot's buffers for the next window
        let next = match self.latest.take() {
            Some(mut old) => {
                old.clear();
                old
            }
            None => Waveforms::with_capacity(self.window),
        };
        self.latest = Some(std::mem::replace(&mut self.current, next));
        self.published += 1;
        true
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.latest = None;
        self.published = 0;
    }
}

/// Cavity, controller and loop state for one simulated system.
#[derive(Debug)]
pub struct SimulationContext {
    scenario: Option<ScenarioConfig>,
    cavity: CavityModel,
    controller: ControllerBank,
    drive_if: f64,
    setpoint: Complex64,
    feedback_enabled: bool,
    feedforward_enabled: bool,
    steps: u64,
    capture: WaveformCapture,
}

impl Default for SimulationContext {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LEN)
    }
}

impl SimulationContext {
    pub fn new(capture_len: usize) -> Self {
        Self {
            scenario: None,
            cavity: CavityModel::new(),
            controller: ControllerBank::new(),
            drive_if: 0.0,
            setpoint: Complex64::new(0.0, 0.0),
            feedback_enabled: false,
            feedforward_enabled: false,
            steps: 0,
            capture: WaveformCapture::new(capture_len),
        }
    }

    /// Build a ready context from a scenario.
    pub fn from_scenario(scenario: &ScenarioConfig) -> Result<Self> {
        let mut ctx = Self::new(scenario.capture_len);
        ctx.configure(scenario)?;
        Ok(ctx)
    }

    /// Apply a scenario to both cavity and controller.
    ///
    /// Everything is validated before either component changes, so a
    /// rejected scenario leaves the context exactly as it was.
    pub fn configure(&mut self, scenario: &ScenarioConfig) -> Result<()> {
        let checked = scenario.validate().and_then(|()| {
            let ctrl = scenario.controller_parameters()?;
            ctrl.validate(
                self.controller.notch_capacity(),
                self.controller.feedforward_capacity(),
            )?;
            CavityConstants::derive(&scenario.cavity)?;
            Ok(ctrl)
        });
        let ctrl = match checked {
            Ok(ctrl) => ctrl,
            Err(err) => {
                warn!(%err, "scenario rejected");
                return Err(err);
            }
        };

        self.cavity.configure(&scenario.cavity)?;
        self.controller.configure(&ctrl)?;
        self.setpoint = scenario.setpoint();
        self.feedback_enabled = scenario.feedback_enabled;
        self.feedforward_enabled = scenario.feedforward_enabled;
        if self.capture.window() != scenario.capture_len {
            self.capture = WaveformCapture::new(scenario.capture_len);
        }
        self.scenario = Some(scenario.clone());

        info!(
            notches = ctrl.notches.len(),
            feedforward = ctrl.feedforward.len(),
            setpoint = scenario.setpoint.amplitude,
            feedback = self.feedback_enabled,
            feedforward_enabled = self.feedforward_enabled,
            "simulation configured"
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.scenario.is_some()
    }

    pub fn scenario(&self) -> Option<&ScenarioConfig> {
        self.scenario.as_ref()
    }

    /// Return every component to its initial state; parameters are kept.
    pub fn reset(&mut self) {
        if !self.is_ready() {
            return;
        }
        self.cavity.reset();
        self.controller.reset();
        self.drive_if = 0.0;
        self.steps = 0;
        self.capture.clear();
        info!("simulation reset");
    }

    pub fn set_setpoint(&mut self, setpoint: Complex64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> Complex64 {
        self.setpoint
    }

    pub fn set_feedback_enabled(&mut self, enabled: bool) {
        self.feedback_enabled = enabled;
    }

    pub fn set_feedforward_enabled(&mut self, enabled: bool) {
        self.feedforward_enabled = enabled;
    }

    pub fn cavity(&self) -> &CavityModel {
        &self.cavity
    }

    pub fn controller(&self) -> &ControllerBank {
        &self.controller
    }

    pub fn capture(&self) -> &WaveformCapture {
        &self.capture
    }

    /// Loop samples since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulation time of the next sample (s).
    pub fn time(&self) -> f64 {
        self.cavity
            .constants()
            .map_or(0.0, |c| self.steps as f64 * c.ts)
    }

    /// Advance cavity and controller by one sample.
    pub fn step(&mut self) -> LoopSample {
        if !self.is_ready() {
            return LoopSample::default();
        }
        let time = self.time();
        let cavity = self.cavity.step(self.drive_if);
        let controller = self.controller.step(
            cavity.vc_if,
            self.setpoint,
            self.feedback_enabled,
            self.feedforward_enabled,
        );
        self.drive_if = controller.drive_if;
        self.steps += 1;
        self.capture.record(cavity.vc_if, controller.vc, time);

        LoopSample {
            time,
            cavity,
            controller,
        }
    }

    /// Run `n` samples and return the last one.
    pub fn run(&mut self, n: usize) -> Option<LoopSample> {
        if !self.is_ready() {
            return None;
        }
        let mut last = None;
        for _ in 0..n {
            last = Some(self.step());
        }
        last
    }
}

/// Context shared between a driver thread and its controllers.
pub type SharedContext = Arc<Mutex<SimulationContext>>;

pub fn shared(ctx: SimulationContext) -> SharedContext {
    Arc::new(Mutex::new(ctx))
}

/// Background thread stepping a [`SharedContext`] until stopped.
#[derive(Debug)]
pub struct SimulationDriver {
    stop: Arc<AtomicBool>,
    steps: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SimulationDriver {
    /// Start the loop thread. `pace` is slept after every sample.
    pub fn spawn(ctx: SharedContext, pace: Option<Duration>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let steps = Arc::new(AtomicU64::new(0));

        let thread_stop = Arc::clone(&stop);
        let thread_steps = Arc::clone(&steps);
        let handle = thread::Builder::new()
            .name("blc-sim".to_string())
            .spawn(move || drive(&ctx, &thread_stop, &thread_steps, pace))
            .map_err(BlcError::Io)?;

        info!(?pace, "simulation driver started");
        Ok(Self {
            stop,
            steps,
            handle: Some(handle),
        })
    }

    /// Samples executed so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread, wait for it and return the number of samples run.
    pub fn stop(mut self) -> u64 {
        self.shutdown();
        self.steps()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("simulation driver thread panicked");
            }
            info!(steps = self.steps(), "simulation driver stopped");
        }
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drive(ctx: &SharedContext, stop: &AtomicBool, steps: &AtomicU64, pace: Option<Duration>) {
    while !stop.load(Ordering::Acquire) {
        let stepped = match ctx.lock() {
            Ok(mut guard) => {
                if guard.is_ready() {
                    guard.step();
                    true
                } else {
                    false
                }
            }
            Err(_) => {
                error!("simulation context lock poisoned, driver exiting");
                return;
            }
        };

        if stepped {
            steps.fetch_add(1, Ordering::Relaxed);
            if let Some(pace) = pace {
                thread::sleep(pace);
            }
        } else {
            thread::sleep(IDLE_POLL);
        }
    }
}
