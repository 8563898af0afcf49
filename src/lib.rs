//! LLRF-BLC - beam-loading compensation for RF cavities
//!
//! A discrete-time model of an RF cavity driven at an intermediate
//! frequency and loaded by a bunched beam, regulated by a controller bank
//! combining PI feedback, narrowband notch feedback on beam harmonics and
//! NCO-based feedforward.
//!
//! ```no_run
//! use llrf_blc::{ScenarioConfig, SimulationContext};
//!
//! let scenario = ScenarioConfig::default();
//! let mut ctx = SimulationContext::from_scenario(&scenario)?;
//! let last = ctx.run(scenario.steps).expect("context is configured");
//! println!("|vc| = {:.0} V", last.cavity.vc.norm());
//! # Ok::<(), llrf_blc::BlcError>(())
//! ```

pub mod cavity;
pub mod config;
pub mod controller;
pub mod error;
pub mod harmonics;
pub mod math;
pub mod nco;
pub mod noise;
pub mod sim;
pub mod spectrum;

// Re-export main types
pub use cavity::{CavityModel, CavityOutput, CavityParameters};
pub use config::ScenarioConfig;
pub use controller::{ControllerBank, ControllerOutput, ControllerParameters};
pub use error::{BlcError, Result};
pub use nco::Nco;
pub use noise::{NoiseGenerator, NoiseSpec};
pub use sim::{LoopSample, SharedContext, SimulationContext, SimulationDriver, Waveforms};
pub use spectrum::Spectrum;
