//! # Engine Lifecycle Tests
//!
//! The engine built from TOML, run for real iterations:
//!
//! 1. **Startup**: configuration to running device threads
//! 2. **Main loop**: scripted motion and a spring, seen in the scene graph
//! 3. **Degraded devices**: an unavailable device does not stop the engine
//! 4. **Shutdown**: threads joined before the graph is released

use std::sync::Arc;
use std::time::{Duration, Instant};

use tactile::{EngineConfig, EngineContext, EngineError};
use tactile_core::{Caller, FieldError, Vec3};
use tactile_haptics::{DeviceState, SpringEffect};

const TWO_DEVICES: &str = r#"
[scene]
target_fps = 100

[realtime]
rate_hz = 1000

[[device]]
name = "Left"
calibration_translation = [-0.5, 0.0, 0.0]

[[device]]
name = "Right"
calibration_translation = [0.5, 0.0, 0.0]
proxy_weighting = 0.5
"#;

fn engine(text: &str) -> EngineContext {
    let config = EngineConfig::from_toml_str(text).unwrap();
    let mut engine = EngineContext::from_config(config).unwrap();
    engine.initialize_devices().unwrap();
    engine
}

fn iterate_until(
    engine: &mut EngineContext,
    mut condition: impl FnMut(&mut EngineContext) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        engine.iterate().unwrap();
        if condition(engine) {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

// ============================================================================
// STARTUP
// ============================================================================

#[test]
fn test_devices_start_from_configuration() {
    let mut engine = engine(TWO_DEVICES);

    for name in ["Left", "Right"] {
        let device = engine.device(name).unwrap();
        assert_eq!(device.state(), DeviceState::Running);
        assert!(!device.is_degraded());
    }
    iterate_until(&mut engine, |engine| {
        engine.devices().all(|device| device.haptics_loops() > 10)
    });
    engine.shutdown().unwrap();
}

// ============================================================================
// MAIN LOOP
// ============================================================================

#[test]
fn test_tracker_positions_are_calibrated_per_device() {
    let mut engine = engine(TWO_DEVICES);
    engine
        .set_fake_position("Left", Vec3::new(0.0, 0.1, 0.0))
        .unwrap();
    engine
        .set_fake_position("Right", Vec3::new(0.0, 0.1, 0.0))
        .unwrap();

    iterate_until(&mut engine, |engine| {
        let left = engine.device_report("Left").unwrap().tracker_position;
        let right = engine.device_report("Right").unwrap().tracker_position;
        left.approx_eq(Vec3::new(-0.5, 0.1, 0.0), 1e-12)
            && right.approx_eq(Vec3::new(0.5, 0.1, 0.0), 1e-12)
    });
    engine.shutdown().unwrap();
}

#[test]
fn test_spring_pulls_device_back_to_anchor() {
    let mut engine = engine(TWO_DEVICES);
    let anchor = Vec3::new(-0.5, 0.0, 0.0);
    engine
        .render_effects("Left", vec![Arc::new(SpringEffect::new(anchor, 100.0))])
        .unwrap();
    engine
        .set_fake_position("Left", Vec3::new(0.0, 0.01, 0.0))
        .unwrap();

    iterate_until(&mut engine, |engine| {
        let report = engine.device_report("Left").unwrap();
        report.force.approx_eq(Vec3::new(0.0, -1.0, 0.0), 1e-9)
    });

    let right = engine.device_report("Right").unwrap();
    assert_eq!(right.force, Vec3::ZERO);
    engine.shutdown().unwrap();
}

#[test]
fn test_weighted_proxy_follows_tracker_and_proxy() {
    let mut engine = engine(TWO_DEVICES);
    let (proxy, weighted) = {
        let fields = engine.device("Right").unwrap().fields();
        (fields.proxy_position, fields.weighted_proxy_position)
    };

    engine
        .set_fake_position("Right", Vec3::new(0.0, 0.2, 0.0))
        .unwrap();
    iterate_until(&mut engine, |engine| {
        engine
            .device_report("Right")
            .unwrap()
            .tracker_position
            .approx_eq(Vec3::new(0.5, 0.2, 0.0), 1e-12)
    });

    engine
        .graph_mut()
        .set_value(proxy, Vec3::new(0.5, 0.0, 0.0))
        .unwrap();
    let blended = engine.graph_mut().get_value::<Vec3>(weighted).unwrap();
    assert!(blended.approx_eq(Vec3::new(0.5, 0.1, 0.0), 1e-12));
    engine.shutdown().unwrap();
}

#[test]
fn test_device_outputs_are_owned_by_the_device() {
    let mut engine = engine(TWO_DEVICES);
    let (node, force) = {
        let device = engine.device("Left").unwrap();
        (device.node(), device.fields().force.id())
    };

    let external = engine.graph_mut().set_value(force, Vec3::X);
    assert!(matches!(external, Err(FieldError::Access { .. })));
    let owner = engine
        .graph_mut()
        .set_value_as(Caller::Node(node), force, Vec3::X);
    assert!(owner.is_ok());
    engine.shutdown().unwrap();
}

// ============================================================================
// DEGRADED DEVICES
// ============================================================================

#[test]
fn test_unavailable_device_runs_degraded() {
    let text = r#"
        [[device]]
        name = "Broken"
        fail_open = true

        [[device]]
        name = "Working"
    "#;
    let mut engine = engine(text);

    assert!(engine.device("Broken").unwrap().is_degraded());
    assert!(!engine.device("Working").unwrap().is_degraded());

    engine
        .render_effects("Broken", vec![Arc::new(SpringEffect::default())])
        .unwrap();
    engine
        .set_fake_position("Broken", Vec3::new(0.3, 0.0, 0.0))
        .unwrap();
    iterate_until(&mut engine, |engine| {
        engine.device("Broken").unwrap().haptics_loops() > 20
    });

    let report = engine.device_report("Broken").unwrap();
    assert!(report.degraded);
    assert_eq!(report.tracker_position, Vec3::ZERO);
    assert_eq!(engine.fake_controls("Broken").unwrap().forces_sent(), 0);
    engine.shutdown().unwrap();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_joins_every_thread() {
    let mut engine = engine(TWO_DEVICES);
    engine.iterate().unwrap();
    engine.shutdown().unwrap();

    let loops: Vec<u64> = engine.devices().map(|device| device.haptics_loops()).collect();
    std::thread::sleep(Duration::from_millis(20));
    let after: Vec<u64> = engine.devices().map(|device| device.haptics_loops()).collect();
    assert_eq!(loops, after, "a device thread kept running");

    assert!(matches!(
        engine.render_effects("Missing", Vec::new()),
        Err(EngineError::UnknownDevice(_))
    ));
}

#[test]
fn test_dropping_the_engine_stops_devices() {
    let engine = engine(TWO_DEVICES);
    let started = Instant::now();
    drop(engine);
    assert!(started.elapsed() < Duration::from_secs(5));
}
