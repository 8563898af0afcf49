//! Beam-Loading Compensation Example
//!
//! Runs the same storage-ring-like cavity with PI feedback alone and with
//! notch feedback on the first beam harmonics, then compares the residual
//! amplitude ripple and the IF sidebands at `fif ± h·fb`.

use llrf_blc::cavity::CavityParameters;
use llrf_blc::config::{LoopSettings, SetpointSettings};
use llrf_blc::controller::NotchDiscretization;
use llrf_blc::harmonics::NotchHarmonic;
use llrf_blc::math::spread;
use llrf_blc::{ScenarioConfig, SimulationContext};

const HARMONIC_NUMBER: f64 = 21_682.0;
const BUNCH_PERIODS: usize = 80;

fn scenario() -> ScenarioConfig {
    let frf = 650.0e6;
    let fb = frf / HARMONIC_NUMBER;
    ScenarioConfig {
        cavity: CavityParameters {
            frf,
            bunch_charge: 1.6e-19 * 14.0e10,
            bunch_rate: fb,
            beam_phase_deg: -50.0,
            sample_rate: 4000.0 * fb,
            if_freq: 500.0 * fb,
            noise_psd: -130.0,
            ..CavityParameters::default()
        },
        loop_settings: LoopSettings {
            // one IF period, so the 2·fif image averages out
            demod_window: 8,
            loop_phase_deg: 0.0,
            kp: 10.0,
            ki: 1.0e5,
        },
        setpoint: SetpointSettings {
            amplitude: 1.0e6,
            phase_deg: 30.0,
        },
        steps: BUNCH_PERIODS * 4000,
        ..ScenarioConfig::default()
    }
}

fn run(label: &str, scenario: &ScenarioConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = SimulationContext::from_scenario(scenario)?;
    ctx.run(scenario.steps);

    let window = ctx
        .capture()
        .latest()
        .ok_or("run too short for one capture window")?;
    let spectrum = window.spectrum(scenario.cavity.sample_rate)?;
    let fb = scenario.cavity.bunch_rate;
    let fif = scenario.cavity.if_freq;

    println!("{label}");
    println!(
        "  |vc| = {:.4e} V, ripple {:.3e} V, phase ripple {:.4} deg",
        ctx.cavity().voltage().norm(),
        spread(&window.amplitude),
        spread(&window.phase_deg)
    );
    for h in 1..=3 {
        let upper = spectrum.amplitude_at(fif + h as f64 * fb).unwrap_or(f64::NAN);
        let lower = spectrum.amplitude_at(fif - h as f64 * fb).unwrap_or(f64::NAN);
        println!("  sideband h={h}: {upper:7.1} dB / {lower:7.1} dB");
    }
    println!();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Running beam-loading compensation comparison...\n");

    let base = scenario();
    println!("Configuration:");
    println!("  Bunch rate: {:.1} Hz", base.cavity.bunch_rate);
    println!("  Sample rate: {:.4e} Hz", base.cavity.sample_rate);
    println!("  Samples: {}", base.steps);
    println!();

    run("PI feedback", &base)?;

    let notched = ScenarioConfig {
        notch: (1..=3)
            .map(|harmonic| NotchHarmonic {
                harmonic,
                gain: 20.0,
                half_bandwidth: 200.0,
                discretization: NotchDiscretization::Bilinear,
            })
            .collect(),
        ..base.clone()
    };
    run("PI + notch feedback (h = 1..3)", &notched)?;

    Ok(())
}
