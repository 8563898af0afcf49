use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use llrf_blc::math::spread;
use llrf_blc::sim::shared;
use llrf_blc::{ScenarioConfig, SimulationContext, SimulationDriver};

#[derive(Debug, Parser)]
#[command(name = "blc-sim")]
#[command(about = "Closed-loop RF cavity beam-loading compensation simulation")]
struct Cli {
    /// Scenario file (TOML); the built-in reference scenario when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of samples to simulate
    #[arg(long)]
    steps: Option<usize>,

    /// Override the measurement noise seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run the loop on a background driver thread for `--duration-ms`
    #[arg(long, default_value_t = false)]
    threaded: bool,

    #[arg(long, default_value_t = 1000)]
    duration_ms: u64,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn init_logging(level: Level) {
    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(level)
        .init();
}

fn load_scenario(cli: &Cli) -> Result<ScenarioConfig> {
    let mut scenario = match &cli.config {
        Some(path) => ScenarioConfig::from_toml_file(path)
            .with_context(|| format!("failed to load scenario {}", path.display()))?,
        None => ScenarioConfig::default(),
    };
    if let Some(steps) = cli.steps {
        scenario.steps = steps;
    }
    if let Some(seed) = cli.seed {
        scenario.cavity.noise_seed = seed;
    }
    Ok(scenario)
}

fn summarize(ctx: &SimulationContext) {
    let vc = ctx.cavity().voltage();
    info!(
        steps = ctx.steps(),
        time_s = ctx.time(),
        amplitude_v = vc.norm(),
        phase_deg = vc.arg().to_degrees(),
        setpoint_v = ctx.setpoint().norm(),
        bunches = ctx.cavity().kicks(),
        "cavity voltage"
    );

    let Some(window) = ctx.capture().latest() else {
        warn!(
            filled = ctx.capture().filled(),
            window = ctx.capture().window(),
            "no complete capture window"
        );
        return;
    };
    info!(
        samples = window.len(),
        amplitude_spread_v = spread(&window.amplitude),
        phase_spread_deg = spread(&window.phase_deg),
        "last capture window"
    );

    let Some(fs) = ctx.scenario().map(|s| s.cavity.sample_rate) else {
        return;
    };
    match window.spectrum(fs) {
        Ok(spectrum) => {
            if let Some((freq, db)) = spectrum.peak() {
                info!(peak_hz = freq, peak_db = db, "IF spectrum");
            }
        }
        Err(err) => warn!(%err, "spectrum unavailable"),
    }
}

fn run_batch(scenario: &ScenarioConfig) -> Result<()> {
    let mut ctx =
        SimulationContext::from_scenario(scenario).context("scenario rejected by the model")?;
    ctx.run(scenario.steps);
    summarize(&ctx);
    Ok(())
}

fn run_threaded(scenario: &ScenarioConfig, duration: Duration) -> Result<()> {
    let ctx = shared(SimulationContext::new(scenario.capture_len));
    ctx.lock()
        .map_err(|_| anyhow!("simulation context lock poisoned"))?
        .configure(scenario)
        .context("scenario rejected by the model")?;

    let driver = SimulationDriver::spawn(ctx.clone(), None)?;
    thread::sleep(duration);
    let steps = driver.stop();
    info!(steps, "driver finished");

    let guard = ctx
        .lock()
        .map_err(|_| anyhow!("simulation context lock poisoned"))?;
    summarize(&guard);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let scenario = load_scenario(&cli)?;
    info!(
        steps = scenario.steps,
        notches = scenario.notch.len(),
        feedforward = scenario.feedforward.len(),
        "scenario loaded"
    );

    if cli.threaded {
        run_threaded(&scenario, Duration::from_millis(cli.duration_ms))
    } else {
        run_batch(&scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_is_validated() {
        let cli = Cli::try_parse_from(["blc-sim", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(Cli::try_parse_from(["blc-sim"]).unwrap().log_level, Level::INFO);
        assert!(Cli::try_parse_from(["blc-sim", "--log-level", "loud"]).is_err());
    }
}
