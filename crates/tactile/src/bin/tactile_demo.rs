//! # TACTILE Demo
//!
//! Headless run of the configured devices: every fake device is moved on
//! a small circle around a spring anchor while the scene graph runs at
//! `scene.target_fps`.
//!
//! ```text
//! tactile_demo --config tactile.toml --iterations 600
//! RUST_LOG=debug tactile_demo
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tactile::{EngineConfig, EngineContext};
use tactile_core::{TickLoop, Vec3};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Radius of the scripted motion, metres.
const RADIUS: f64 = 0.02;

/// Runs fake haptic devices against a spring effect
#[derive(Parser, Debug)]
#[command(name = "tactile_demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs fake haptic devices against a spring effect", long_about = None)]
struct Args {
    /// Configuration file; built-in defaults if omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scene-graph iterations to run
    #[arg(short = 'n', long, default_value_t = 300)]
    iterations: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let target_fps = config.scene.target_fps;
    let spring = config.spring;

    let mut engine = EngineContext::from_config(config)?;
    engine.initialize_devices()?;

    let names: Vec<String> = engine.devices().map(|device| device.name().to_string()).collect();
    for name in &names {
        engine.render_effects(name, vec![Arc::new(spring)])?;
    }

    let mut pacing = TickLoop::new(target_fps, Duration::ZERO);
    for iteration in 0..args.iterations {
        let start = pacing.begin_tick();

        #[allow(clippy::cast_precision_loss)]
        let angle = iteration as f64 * std::f64::consts::TAU / f64::from(target_fps);
        let position = spring.position + Vec3::new(angle.cos(), angle.sin(), 0.0) * RADIUS;
        for name in &names {
            engine.set_fake_position(name, position)?;
        }
        let stats = engine.iterate()?;

        if iteration % u64::from(target_fps) == 0 {
            for name in &names {
                let report = engine.device_report(name)?;
                info!(
                    device = %name,
                    iteration,
                    tracker = ?report.tracker_position,
                    force = ?report.force,
                    rate_hz = report.haptics_rate,
                    degraded = report.degraded,
                    transfers = stats.transfers,
                    "device state"
                );
            }
        }

        pacing.end_tick(start);
        pacing.wait_for_next_tick();
    }

    let late = pacing.stats().late_ticks;
    engine.shutdown()?;
    info!(iterations = args.iterations, late_iterations = late, "demo finished");
    Ok(())
}
