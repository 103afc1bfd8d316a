//! # Device Loop Tests
//!
//! A fake device driven through full scene-graph iterations:
//!
//! 1. **Scripted motion**: main-thread writes reach the device, the
//!    sampled state comes back calibrated
//! 2. **Effects**: rendered forces follow the device, effect changes are
//!    seen between ticks
//! 3. **Diagnostics**: the loop reports its rate
//! 4. **Teardown**: the graph stays usable after the thread stopped

use std::sync::Arc;
use std::time::{Duration, Instant};

use tactile_core::{FieldGraph, Matrix4, Vec3};
use tactile_haptics::{
    fake_device, ConstantForce, DeviceSettings, DeviceState, FakeControls, FakeDevice,
    SpringEffect,
};

fn running_device(
    graph: &mut FieldGraph,
    settings: &DeviceSettings,
) -> (FakeDevice, FakeControls) {
    let (mut device, controls) = fake_device(graph, "Fake", settings, false).unwrap();
    device.init_device(graph).unwrap();
    (device, controls)
}

/// Runs scene-graph iterations until `condition` holds.
fn iterate_until(
    graph: &mut FieldGraph,
    device: &mut FakeDevice,
    mut condition: impl FnMut(&mut FieldGraph, &FakeDevice) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        device.update_device_values(graph).unwrap();
        graph.sweep();
        if condition(graph, device) {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

// ============================================================================
// SCRIPTED MOTION
// ============================================================================

#[test]
fn test_scripted_positions_come_back_calibrated() {
    let mut graph = FieldGraph::new();
    let settings = DeviceSettings {
        position_calibration: Matrix4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
        ..DeviceSettings::default()
    };
    let (mut device, controls) = running_device(&mut graph, &settings);
    let tracker = device.fields().tracker_position;

    for step in 1..=5 {
        let target = Vec3::new(0.01 * f64::from(step), 0.0, 0.0);
        controls.set_position.set(&mut graph, target).unwrap();
        let expected = target + Vec3::new(0.0, 0.0, -1.0);
        iterate_until(&mut graph, &mut device, |graph, _| {
            graph
                .get_value::<Vec3>(tracker)
                .unwrap()
                .approx_eq(expected, 1e-12)
        });
    }

    device.disable_device(&mut graph).unwrap();
}

#[test]
fn test_button_press_reaches_scene_graph() {
    let mut graph = FieldGraph::new();
    let (mut device, controls) = running_device(&mut graph, &DeviceSettings::default());
    let button = device.fields().main_button.id();

    controls.set_button.set(&mut graph, true).unwrap();
    iterate_until(&mut graph, &mut device, |graph, _| {
        graph.get_value::<bool>(button).unwrap()
    });
    controls.set_button.set(&mut graph, false).unwrap();
    iterate_until(&mut graph, &mut device, |graph, _| {
        !graph.get_value::<bool>(button).unwrap()
    });

    device.disable_device(&mut graph).unwrap();
}

// ============================================================================
// EFFECTS
// ============================================================================

#[test]
fn test_spring_force_follows_device() {
    let mut graph = FieldGraph::new();
    let (mut device, controls) = running_device(&mut graph, &DeviceSettings::default());
    let force = device.fields().force.id();

    device
        .render_effects(vec![Arc::new(SpringEffect::new(Vec3::ZERO, 100.0))])
        .unwrap();
    controls
        .set_position
        .set(&mut graph, Vec3::new(0.0, 0.02, 0.0))
        .unwrap();

    iterate_until(&mut graph, &mut device, |graph, _| {
        graph
            .get_value::<Vec3>(force)
            .unwrap()
            .approx_eq(Vec3::new(0.0, -2.0, 0.0), 1e-9)
    });
    assert!(controls.forces_sent() > 0);

    device.disable_device(&mut graph).unwrap();
}

#[test]
fn test_effect_change_is_atomic_between_ticks() {
    let mut graph = FieldGraph::new();
    let (mut device, _controls) = running_device(&mut graph, &DeviceSettings::default());
    let force = device.fields().force.id();

    for magnitude in [1.0, 2.0, 3.0] {
        let effect = ConstantForce {
            force: Vec3::new(magnitude, 0.0, 0.0),
            ..ConstantForce::default()
        };
        device.render_effects(vec![Arc::new(effect)]).unwrap();
        iterate_until(&mut graph, &mut device, |graph, _| {
            let seen = graph.get_value::<Vec3>(force).unwrap();
            assert!(seen.x <= magnitude + 1e-12, "force from a future set: {seen:?}");
            (seen.x - magnitude).abs() < 1e-12
        });
    }

    device.render_effects(Vec::new()).unwrap();
    iterate_until(&mut graph, &mut device, |graph, _| {
        graph.get_value::<Vec3>(force).unwrap() == Vec3::ZERO
    });
    device.disable_device(&mut graph).unwrap();
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[test]
fn test_haptics_rate_is_reported() {
    let mut graph = FieldGraph::new();
    let (mut device, _controls) = running_device(&mut graph, &DeviceSettings::default());
    let rate = device.fields().haptics_rate.id();

    iterate_until(&mut graph, &mut device, |graph, _| {
        graph.get_value::<u32>(rate).unwrap() > 100
    });
    let stats = device.tick_stats().unwrap();
    assert!(stats.total_ticks > 100);

    device.disable_device(&mut graph).unwrap();
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[test]
fn test_graph_usable_after_disable() {
    let mut graph = FieldGraph::new();
    let (mut device, controls) = running_device(&mut graph, &DeviceSettings::default());
    device.disable_device(&mut graph).unwrap();
    assert_eq!(device.state(), DeviceState::Uninitialized);

    controls.set_position.set(&mut graph, Vec3::Y).unwrap();
    device.update_device_values(&mut graph).unwrap();
    assert_eq!(graph.sweep(), 0);

    device.init_device(&mut graph).unwrap();
    iterate_until(&mut graph, &mut device, |graph, device| {
        device
            .fields()
            .device_position
            .get(graph)
            .unwrap()
            .approx_eq(Vec3::Y, 1e-12)
    });
    device.disable_device(&mut graph).unwrap();
}
