//! # Engine Context
//!
//! Owns the scene graph and the devices with their real-time threads.
//!
//! ```text
//! Iteration N (main thread):
//! ┌──────────────────────────────────────────────────────────────┐
//! │ 1. DEVICE VALUES                                             │
//! │    └─ every running device: pull real-time fields            │
//! │                                                              │
//! │ 2. SWEEP                                                     │
//! │    └─ periodic fields brought up to date                     │
//! │                                                              │
//! │ 3. EFFECTS (caller)                                          │
//! │    └─ render_effects: swap the set on the real-time thread   │
//! └──────────────────────────────────────────────────────────────┘
//!
//! Shutdown: disable every device (join thread, close backend),
//!           then release the graph.
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tactile_core::{FieldGraph, Vec3};
use tactile_haptics::{fake_device, DeviceState, EffectVec, FakeControls, HapticsDevice};
use tracing::{debug, info, warn};

use crate::config::{DeviceKind, EngineConfig};
use crate::error::{EngineError, EngineResult};

/// Timing and work of one scene-graph iteration.
#[derive(Clone, Copy, Debug, Default)]
pub struct IterationStats {
    /// Iteration number, starting at 0.
    pub iteration: u64,
    /// Whole iteration, microseconds.
    pub total_us: u64,
    /// Device value updates, microseconds.
    pub devices_us: u64,
    /// Periodic sweep, microseconds.
    pub sweep_us: u64,
    /// Values pulled from real-time threads.
    pub transfers: u64,
    /// Field recomputations.
    pub updates: u64,
}

/// Accumulated iteration statistics.
#[derive(Clone, Debug)]
pub struct IterationStatsAccumulator {
    /// Iterations recorded.
    pub iterations: u64,
    /// Sum of iteration times.
    pub total_us_sum: u64,
    /// Shortest iteration.
    pub min_iteration_us: u64,
    /// Longest iteration.
    pub max_iteration_us: u64,
    /// Iterations longer than the frame budget.
    pub over_budget: u64,
    budget_us: u64,
}

impl IterationStatsAccumulator {
    fn new(target_fps: u32) -> Self {
        Self {
            iterations: 0,
            total_us_sum: 0,
            min_iteration_us: u64::MAX,
            max_iteration_us: 0,
            over_budget: 0,
            budget_us: 1_000_000 / u64::from(target_fps.max(1)),
        }
    }

    fn record(&mut self, stats: IterationStats) {
        self.iterations += 1;
        self.total_us_sum += stats.total_us;
        self.min_iteration_us = self.min_iteration_us.min(stats.total_us);
        self.max_iteration_us = self.max_iteration_us.max(stats.total_us);
        if stats.total_us > self.budget_us {
            self.over_budget += 1;
        }
    }

    /// Average iteration time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_iteration_ms(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        (self.total_us_sum as f64 / self.iterations as f64) / 1000.0
    }
}

/// Scene-graph view of one device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceReport {
    /// Calibrated position.
    pub tracker_position: Vec3,
    /// Last rendered force, world space.
    pub force: Vec3,
    /// Loops per second of the real-time thread.
    pub haptics_rate: u32,
    /// Ticks since the device was created.
    pub haptics_loops: u64,
    /// Running without hardware.
    pub degraded: bool,
}

/// The engine: graph, devices and their shutdown order.
pub struct EngineContext {
    graph: FieldGraph,
    devices: Vec<Box<dyn HapticsDevice>>,
    fake_controls: HashMap<String, FakeControls>,
    config: EngineConfig,
    iteration: u64,
    stats: IterationStatsAccumulator,
}

impl EngineContext {
    /// Builds the graph and the device nodes. No thread is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a device node
    /// cannot be created.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let mut graph = FieldGraph::new();
        let mut devices: Vec<Box<dyn HapticsDevice>> = Vec::with_capacity(config.devices.len());
        let mut fake_controls = HashMap::new();

        for device in &config.devices {
            let settings = device.settings(&config.realtime);
            match device.kind {
                DeviceKind::Fake => {
                    let (fake, controls) =
                        fake_device(&mut graph, device.name.clone(), &settings, device.fail_open)?;
                    devices.push(Box::new(fake));
                    fake_controls.insert(device.name.clone(), controls);
                }
            }
            debug!(device = %device.name, kind = ?device.kind, "device created");
        }

        let stats = IterationStatsAccumulator::new(config.scene.target_fps);
        Ok(Self {
            graph,
            devices,
            fake_controls,
            config,
            iteration: 0,
            stats,
        })
    }

    /// Starts every device's real-time thread.
    ///
    /// # Errors
    ///
    /// Returns the first device that failed to start; devices started
    /// before it keep running.
    pub fn initialize_devices(&mut self) -> EngineResult<()> {
        for device in &mut self.devices {
            device.init_device(&mut self.graph)?;
        }
        info!(devices = self.devices.len(), "devices initialized");
        Ok(())
    }

    /// Runs one scene-graph iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if a device field was removed from the graph.
    pub fn iterate(&mut self) -> EngineResult<IterationStats> {
        let start = Instant::now();
        let before = self.graph.stats();

        for device in &mut self.devices {
            if device.state() == DeviceState::Running {
                device.update_device_values(&mut self.graph)?;
            }
        }
        let devices_done = Instant::now();
        self.graph.sweep();
        let end = Instant::now();

        let after = self.graph.stats();
        let stats = IterationStats {
            iteration: self.iteration,
            total_us: micros(end - start),
            devices_us: micros(devices_done - start),
            sweep_us: micros(end - devices_done),
            transfers: after.transfers - before.transfers,
            updates: after.updates - before.updates,
        };
        self.iteration += 1;
        self.stats.record(stats);
        Ok(stats)
    }

    /// Hands `effects` to the named device.
    ///
    /// # Errors
    ///
    /// Returns an error if no such device exists or its thread died.
    pub fn render_effects(&mut self, device: &str, effects: EffectVec) -> EngineResult<()> {
        let device = self
            .devices
            .iter_mut()
            .find(|candidate| candidate.name() == device)
            .ok_or_else(|| EngineError::UnknownDevice(device.to_string()))?;
        device.render_effects(effects)?;
        Ok(())
    }

    /// Moves a fake device.
    ///
    /// # Errors
    ///
    /// Returns an error if `device` is not a fake device.
    pub fn set_fake_position(&mut self, device: &str, position: Vec3) -> EngineResult<()> {
        let controls = self
            .fake_controls
            .get(device)
            .ok_or_else(|| EngineError::UnknownDevice(device.to_string()))?;
        controls.set_position.set(&mut self.graph, position)?;
        Ok(())
    }

    /// Presses or releases a fake device's button.
    ///
    /// # Errors
    ///
    /// Returns an error if `device` is not a fake device.
    pub fn set_fake_button(&mut self, device: &str, pressed: bool) -> EngineResult<()> {
        let controls = self
            .fake_controls
            .get(device)
            .ok_or_else(|| EngineError::UnknownDevice(device.to_string()))?;
        controls.set_button.set(&mut self.graph, pressed)?;
        Ok(())
    }

    /// Current scene-graph values of a device.
    ///
    /// # Errors
    ///
    /// Returns an error if no such device exists.
    pub fn device_report(&mut self, device: &str) -> EngineResult<DeviceReport> {
        let device = self
            .devices
            .iter()
            .find(|candidate| candidate.name() == device)
            .ok_or_else(|| EngineError::UnknownDevice(device.to_string()))?;
        let fields = device.fields();
        Ok(DeviceReport {
            tracker_position: self.graph.get_value(fields.tracker_position)?,
            force: fields.force.get(&mut self.graph)?,
            haptics_rate: fields.haptics_rate.get(&mut self.graph)?,
            haptics_loops: device.haptics_loops(),
            degraded: device.is_degraded(),
        })
    }

    /// The named device.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&dyn HapticsDevice> {
        self.devices
            .iter()
            .find(|device| device.name() == name)
            .map(AsRef::as_ref)
    }

    /// All devices, in configuration order.
    pub fn devices(&self) -> impl Iterator<Item = &dyn HapticsDevice> {
        self.devices.iter().map(|device| {
            let device: &dyn HapticsDevice = device.as_ref();
            device
        })
    }

    /// Controls of a fake device.
    #[must_use]
    pub fn fake_controls(&self, name: &str) -> Option<&FakeControls> {
        self.fake_controls.get(name)
    }

    /// The scene graph.
    #[inline]
    #[must_use]
    pub const fn graph(&self) -> &FieldGraph {
        &self.graph
    }

    /// The scene graph, mutably.
    #[inline]
    #[must_use]
    pub fn graph_mut(&mut self) -> &mut FieldGraph {
        &mut self.graph
    }

    /// Configuration the context was built from.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Iterations run so far.
    #[inline]
    #[must_use]
    pub const fn iteration_count(&self) -> u64 {
        self.iteration
    }

    /// Accumulated iteration statistics.
    #[must_use]
    pub const fn stats(&self) -> &IterationStatsAccumulator {
        &self.stats
    }

    /// Disables every device, joining its real-time thread.
    ///
    /// All devices are disabled even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        let mut first_error = None;
        for device in &mut self.devices {
            if device.state() == DeviceState::Uninitialized {
                continue;
            }
            if let Err(err) = device.disable_device(&mut self.graph) {
                warn!(device = %device.name(), error = %err, "device shutdown failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        info!(
            iterations = self.iteration,
            avg_ms = self.stats.avg_iteration_ms(),
            over_budget = self.stats.over_budget,
            "engine shut down"
        );
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        let running = self
            .devices
            .iter()
            .any(|device| device.state() == DeviceState::Running);
        if running {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "shutdown on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("devices", &self.devices)
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn two_devices() -> EngineConfig {
        EngineConfig {
            devices: vec![
                DeviceConfig {
                    name: "Left".into(),
                    ..DeviceConfig::default()
                },
                DeviceConfig {
                    name: "Right".into(),
                    ..DeviceConfig::default()
                },
            ],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_builds_one_node_per_device() {
        let context = EngineContext::from_config(two_devices()).unwrap();
        assert_eq!(context.devices().count(), 2);
        assert_eq!(context.graph().node_count(), 2);
        let left = context.device("Left").unwrap();
        assert_eq!(left.state(), DeviceState::Uninitialized);
        assert!(context.device("Middle").is_none());
        assert!(context.fake_controls("Right").is_some());
    }

    #[test]
    fn test_iterate_without_running_devices() {
        let mut context = EngineContext::from_config(two_devices()).unwrap();
        let stats = context.iterate().unwrap();
        assert_eq!(stats.iteration, 0);
        assert_eq!(stats.transfers, 0);
        context.iterate().unwrap();
        assert_eq!(context.iteration_count(), 2);
        assert_eq!(context.stats().iterations, 2);
    }

    #[test]
    fn test_unknown_device_is_an_error() {
        let mut context = EngineContext::from_config(EngineConfig::default()).unwrap();
        let result = context.render_effects("Nope", Vec::new());
        assert!(matches!(result, Err(EngineError::UnknownDevice(ref name)) if name == "Nope"));
        assert!(context.set_fake_position("Nope", Vec3::X).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.realtime.rate_hz = 0;
        assert!(matches!(
            EngineContext::from_config(config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut context = EngineContext::from_config(EngineConfig::default()).unwrap();
        context.initialize_devices().unwrap();
        context.shutdown().unwrap();
        context.shutdown().unwrap();
        assert!(context
            .devices()
            .all(|device| device.state() == DeviceState::Uninitialized));
    }

    #[test]
    fn test_accumulator_tracks_budget() {
        let mut stats = IterationStatsAccumulator::new(100);
        stats.record(IterationStats {
            total_us: 5_000,
            ..IterationStats::default()
        });
        stats.record(IterationStats {
            total_us: 15_000,
            ..IterationStats::default()
        });
        assert_eq!(stats.over_budget, 1);
        assert_eq!(stats.min_iteration_us, 5_000);
        assert_eq!(stats.max_iteration_us, 15_000);
        assert!((stats.avg_iteration_ms() - 10.0).abs() < 1e-9);
    }
}
