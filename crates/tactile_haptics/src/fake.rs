//! # Fake Device
//!
//! A device without hardware. Its transducer state comes from thread-safe
//! input fields on the device node (`set_devicePosition`,
//! `set_deviceOrientation`, `set_mainButton`) that scripts or tests write
//! on the main thread; every write is pushed to the real-time side before
//! the setter returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tactile_core::{
    AccessType, FieldDef, FieldGraph, NodeId, Rotation, RtLink, RtSField, ThreadSafeSField, Vec3,
};

use crate::device::{DeviceIo, DeviceSettings, ThreadedHapticsDevice};
use crate::error::{DeviceError, DeviceResult};

/// A threaded device driven by [`FakeDeviceIo`].
pub type FakeDevice = ThreadedHapticsDevice<FakeDeviceIo>;

/// Scripted device backend.
pub struct FakeDeviceIo {
    name: String,
    position: RtSField<Vec3>,
    orientation: RtSField<Rotation>,
    button: RtSField<bool>,
    previous: Option<(Vec3, Instant)>,
    velocity: Vec3,
    forces_sent: Arc<AtomicU64>,
    fail_open: bool,
}

/// Main-thread controls of a [`FakeDeviceIo`].
#[derive(Debug)]
pub struct FakeControls {
    /// Position the device reports.
    pub set_position: ThreadSafeSField<Vec3>,
    /// Orientation the device reports.
    pub set_orientation: ThreadSafeSField<Rotation>,
    /// Button state the device reports.
    pub set_button: ThreadSafeSField<bool>,
    forces_sent: Arc<AtomicU64>,
}

impl FakeControls {
    /// Forces the device received so far.
    #[must_use]
    pub fn forces_sent(&self) -> u64 {
        self.forces_sent.load(Ordering::Relaxed)
    }
}

impl FakeDeviceIo {
    /// Adds the input fields to `node` and returns the backend with its
    /// controls.
    ///
    /// # Errors
    ///
    /// Returns an error if `node` was removed.
    pub fn create(
        graph: &mut FieldGraph,
        link: &RtLink,
        node: NodeId,
        fail_open: bool,
    ) -> DeviceResult<(Self, FakeControls)> {
        let name = graph.node_name(node)?.to_owned();
        let input = |field: &str| FieldDef::new(field).owner(node).access(AccessType::InputOnly);

        let set_position =
            ThreadSafeSField::new(graph, link, input("set_devicePosition"), Vec3::ZERO)?;
        let set_orientation = ThreadSafeSField::new(
            graph,
            link,
            input("set_deviceOrientation"),
            Rotation::IDENTITY,
        )?;
        let set_button = ThreadSafeSField::new(graph, link, input("set_mainButton"), false)?;
        let forces_sent = Arc::new(AtomicU64::new(0));

        let io = Self {
            name,
            position: set_position.realtime(),
            orientation: set_orientation.realtime(),
            button: set_button.realtime(),
            previous: None,
            velocity: Vec3::ZERO,
            forces_sent: Arc::clone(&forces_sent),
            fail_open,
        };
        let controls = FakeControls {
            set_position,
            set_orientation,
            set_button,
            forces_sent,
        };
        Ok((io, controls))
    }
}

impl DeviceIo for FakeDeviceIo {
    fn open(&mut self) -> DeviceResult<()> {
        if self.fail_open {
            return Err(DeviceError::Open {
                device: self.name.clone(),
                reason: "simulated open failure".into(),
            });
        }
        Ok(())
    }

    fn position(&mut self) -> Vec3 {
        let position = self.position.get();
        let now = Instant::now();
        if let Some((previous, at)) = self.previous {
            let dt = now.saturating_duration_since(at).as_secs_f64();
            if dt > 0.0 {
                self.velocity = (position - previous) * (1.0 / dt);
            }
        }
        self.previous = Some((position, now));
        position
    }

    fn velocity(&mut self) -> Vec3 {
        self.velocity
    }

    fn orientation(&mut self) -> Rotation {
        self.orientation.get()
    }

    fn button_status(&mut self) -> bool {
        self.button.get()
    }

    fn send_force(&mut self, _force: Vec3) -> DeviceResult<()> {
        self.forces_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn send_torque(&mut self, _torque: Vec3) -> DeviceResult<()> {
        Ok(())
    }
}

/// Creates a fake device node named `name`.
///
/// # Errors
///
/// Returns an error if the device fields cannot be created.
pub fn fake_device(
    graph: &mut FieldGraph,
    name: impl Into<String>,
    settings: &DeviceSettings,
    fail_open: bool,
) -> DeviceResult<(FakeDevice, FakeControls)> {
    let name = name.into();
    let mut controls = None;
    let device =
        ThreadedHapticsDevice::with_io(graph, name.clone(), settings, |graph, link, node| {
            let (io, created) = FakeDeviceIo::create(graph, link, node, fail_open)?;
            controls = Some(created);
            Ok(io)
        })?;
    let controls = controls.ok_or(DeviceError::MissingIo(name))?;
    Ok((device, controls))
}
