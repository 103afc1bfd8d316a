//! # Threaded Haptics Device
//!
//! A device node whose transducer state is sampled by its own real-time
//! thread. The scene graph sees the device through thread-safe fields.
//!
//! ```text
//!               init_device                 disable_device
//! UNINITIALIZED ───────────► RUNNING ──────────────────────► UNINITIALIZED
//!                            │
//!                            │ every tick (real-time thread):
//!                            │   read device → rt fields
//!                            │   evaluate effects → send force/torque
//!                            │
//!                            │ every iteration (main thread):
//!                            │   update_device_values: pull rt fields
//!                            │   render_effects: swap effect set
//! ```
//!
//! Device I/O failures never stop the loop. A device that cannot be
//! opened runs with zero position and sends nothing; a failing write is
//! logged once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tactile_core::{
    compute, input, AccessType, CallbackCode, Caller, FieldDef, FieldGraph, FieldId, FieldValue,
    Matrix4, NodeId, RealtimeConfig, RealtimeTask, RealtimeThread, Rotation, RtLink, RtSField,
    ThreadSafeSField, TickInfo, TickStats, Vec3,
};
use tracing::{debug, info, warn};

use crate::effect::{EffectBuffers, EffectInput, EffectOutput, EffectVec};
use crate::error::{DeviceError, DeviceResult};

/// Node type name of threaded devices.
pub const NODE_TYPE: &str = "ThreadedHapticsDevice";

// ----------------------------------------------------------------------
// Device hooks
// ----------------------------------------------------------------------

/// The hooks a hardware backend implements.
///
/// All sampling and output hooks run on the real-time thread, once per
/// tick, and must return within the tick budget.
pub trait DeviceIo: Send + 'static {
    /// Opens the device. Called on the main thread before the loop starts.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Open`] if the device is not available.
    fn open(&mut self) -> DeviceResult<()>;

    /// Releases the device. Called after the loop has exited.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Close`] if the SDK reports a failure.
    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    /// Position in device coordinates, metres.
    fn position(&mut self) -> Vec3;

    /// Velocity in device coordinates, m/s.
    fn velocity(&mut self) -> Vec3;

    /// Orientation in device coordinates.
    fn orientation(&mut self) -> Rotation;

    /// State of the main button.
    fn button_status(&mut self) -> bool;

    /// Sends a force in device coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Write`] on failure.
    fn send_force(&mut self, force: Vec3) -> DeviceResult<()>;

    /// Sends a torque in device coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Write`] on failure.
    fn send_torque(&mut self, torque: Vec3) -> DeviceResult<()>;
}

/// Lifecycle state of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// No real-time thread.
    Uninitialized,
    /// The real-time thread is running.
    Running,
}

/// Construction parameters of a device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSettings {
    /// Real-time thread settings.
    pub realtime: RealtimeConfig,
    /// Initial `proxyWeighting`.
    pub proxy_weighting: f64,
    /// Initial `positionCalibration`.
    pub position_calibration: Matrix4,
    /// Initial `orientationCalibration`.
    pub orientation_calibration: Rotation,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            realtime: RealtimeConfig::default(),
            proxy_weighting: 0.95,
            position_calibration: Matrix4::IDENTITY,
            orientation_calibration: Rotation::IDENTITY,
        }
    }
}

// ----------------------------------------------------------------------
// Fields
// ----------------------------------------------------------------------

/// Field handles of a device node.
#[derive(Debug)]
pub struct DeviceFields {
    /// Raw device position.
    pub device_position: ThreadSafeSField<Vec3>,
    /// Raw device velocity.
    pub device_velocity: ThreadSafeSField<Vec3>,
    /// Raw device orientation.
    pub device_orientation: ThreadSafeSField<Rotation>,
    /// Main button state.
    pub main_button: ThreadSafeSField<bool>,
    /// Last force rendered, world space.
    pub force: ThreadSafeSField<Vec3>,
    /// Last torque rendered, world space.
    pub torque: ThreadSafeSField<Vec3>,
    /// Loops per second of the real-time thread.
    pub haptics_rate: ThreadSafeSField<u32>,
    /// Device space to world space.
    pub position_calibration: ThreadSafeSField<Matrix4>,
    /// Device orientation to world orientation.
    pub orientation_calibration: ThreadSafeSField<Rotation>,
    /// `positionCalibration × devicePosition`.
    pub tracker_position: FieldId,
    /// `positionCalibration × deviceVelocity`, without translation.
    pub tracker_velocity: FieldId,
    /// `orientationCalibration × deviceOrientation`.
    pub tracker_orientation: FieldId,
    /// Proxy position, follows `trackerPosition` unless set.
    pub proxy_position: FieldId,
    /// Blend factor between tracker and proxy.
    pub proxy_weighting: FieldId,
    /// `tracker + proxyWeighting · (proxy − tracker)`.
    pub weighted_proxy_position: FieldId,
    /// True while the device hardware is open.
    pub initialized: FieldId,
}

impl DeviceFields {
    fn create(
        graph: &mut FieldGraph,
        link: &RtLink,
        node: NodeId,
        settings: &DeviceSettings,
    ) -> DeviceResult<Self> {
        let output = |name: &str| FieldDef::new(name).owner(node).access(AccessType::OutputOnly);
        let input_output =
            |name: &str| FieldDef::new(name).owner(node).access(AccessType::InputOutput);
        let owner = Caller::Node(node);

        let device_position =
            ThreadSafeSField::new(graph, link, output("devicePosition"), Vec3::ZERO)?;
        let device_velocity =
            ThreadSafeSField::new(graph, link, output("deviceVelocity"), Vec3::ZERO)?;
        let device_orientation =
            ThreadSafeSField::new(graph, link, output("deviceOrientation"), Rotation::IDENTITY)?;
        let main_button = ThreadSafeSField::new(graph, link, output("mainButton"), false)?;
        let force = ThreadSafeSField::new(graph, link, output("force"), Vec3::ZERO)?;
        let torque = ThreadSafeSField::new(graph, link, output("torque"), Vec3::ZERO)?;
        let haptics_rate = ThreadSafeSField::new(graph, link, output("hapticsRate"), 0u32)?;
        let position_calibration = ThreadSafeSField::new(
            graph,
            link,
            input_output("positionCalibration"),
            settings.position_calibration,
        )?;
        let orientation_calibration = ThreadSafeSField::new(
            graph,
            link,
            input_output("orientationCalibration"),
            settings.orientation_calibration,
        )?;

        let tracker_position = graph.add_field(
            output("trackerPosition").updater(compute(|inputs| {
                let calibration = input::<Matrix4>(inputs, 0)?;
                Some(calibration.transform_point(*input::<Vec3>(inputs, 1)?))
            })),
            settings.position_calibration.transform_point(Vec3::ZERO),
        )?;
        graph.route_as(owner, position_calibration.id(), tracker_position)?;
        graph.route_as(owner, device_position.id(), tracker_position)?;

        let tracker_velocity = graph.add_field(
            output("trackerVelocity").updater(compute(|inputs| {
                let calibration = input::<Matrix4>(inputs, 0)?;
                Some(calibration.transform_vector(*input::<Vec3>(inputs, 1)?))
            })),
            Vec3::ZERO,
        )?;
        graph.route_as(owner, position_calibration.id(), tracker_velocity)?;
        graph.route_as(owner, device_velocity.id(), tracker_velocity)?;

        let tracker_orientation = graph.add_field(
            output("trackerOrientation").updater(compute(|inputs| {
                let calibration = input::<Rotation>(inputs, 0)?;
                Some(*calibration * *input::<Rotation>(inputs, 1)?)
            })),
            settings.orientation_calibration,
        )?;
        graph.route_as(owner, orientation_calibration.id(), tracker_orientation)?;
        graph.route_as(owner, device_orientation.id(), tracker_orientation)?;

        let proxy_position = graph.add_field(input_output("proxyPosition"), Vec3::ZERO)?;
        graph.route_as(owner, tracker_position, proxy_position)?;

        let proxy_weighting =
            graph.add_field(input_output("proxyWeighting"), settings.proxy_weighting)?;

        let weighted_proxy_position = graph.add_field(
            output("weightedProxyPosition").updater(compute(|inputs| {
                let proxy = *input::<Vec3>(inputs, 0)?;
                let tracker = *input::<Vec3>(inputs, 1)?;
                let weight = *input::<f64>(inputs, 2)?;
                Some(tracker + (proxy - tracker) * weight)
            })),
            Vec3::ZERO,
        )?;
        graph.route_as(owner, proxy_position, weighted_proxy_position)?;
        graph.route_as(owner, tracker_position, weighted_proxy_position)?;
        graph.route_as(owner, proxy_weighting, weighted_proxy_position)?;

        let initialized = graph.add_field(output("initialized"), false)?;

        Ok(Self {
            device_position,
            device_velocity,
            device_orientation,
            main_button,
            force,
            torque,
            haptics_rate,
            position_calibration,
            orientation_calibration,
            tracker_position,
            tracker_velocity,
            tracker_orientation,
            proxy_position,
            proxy_weighting,
            weighted_proxy_position,
            initialized,
        })
    }

    /// Fields with a real-time copy.
    #[must_use]
    pub fn thread_safe_ids(&self) -> [FieldId; 9] {
        [
            self.device_position.id(),
            self.device_velocity.id(),
            self.device_orientation.id(),
            self.main_button.id(),
            self.force.id(),
            self.torque.id(),
            self.haptics_rate.id(),
            self.position_calibration.id(),
            self.orientation_calibration.id(),
        ]
    }

    fn realtime(&self) -> RtFields {
        RtFields {
            device_position: self.device_position.realtime(),
            device_velocity: self.device_velocity.realtime(),
            device_orientation: self.device_orientation.realtime(),
            main_button: self.main_button.realtime(),
            force: self.force.realtime(),
            torque: self.torque.realtime(),
            haptics_rate: self.haptics_rate.realtime(),
            position_calibration: self.position_calibration.realtime(),
            orientation_calibration: self.orientation_calibration.realtime(),
        }
    }
}

struct RtFields {
    device_position: RtSField<Vec3>,
    device_velocity: RtSField<Vec3>,
    device_orientation: RtSField<Rotation>,
    main_button: RtSField<bool>,
    force: RtSField<Vec3>,
    torque: RtSField<Vec3>,
    haptics_rate: RtSField<u32>,
    position_calibration: RtSField<Matrix4>,
    orientation_calibration: RtSField<Rotation>,
}

/// Writes only on change, so unchanged fields cost no transfer.
fn publish<T: FieldValue + Clone + PartialEq>(field: &RtSField<T>, value: T) {
    if field.with(|current| *current != value) {
        field.set(value);
    }
}

// ----------------------------------------------------------------------
// Real-time loop
// ----------------------------------------------------------------------

struct DeviceLoop<D> {
    name: String,
    io: D,
    opened: bool,
    fields: RtFields,
    effects: Arc<Mutex<EffectBuffers>>,
    haptics_loops: Arc<AtomicU64>,
    rate_window_start: Duration,
    rate_window_loops: u32,
    write_failed: bool,
}

impl<D: DeviceIo> DeviceLoop<D> {
    fn sample(&mut self) -> (Vec3, Vec3, Rotation, bool) {
        if self.opened {
            (
                self.io.position(),
                self.io.velocity(),
                self.io.orientation(),
                self.io.button_status(),
            )
        } else {
            (Vec3::ZERO, Vec3::ZERO, Rotation::IDENTITY, false)
        }
    }

    fn send(&mut self, output: EffectOutput) {
        if !self.opened {
            return;
        }
        let sent = self
            .io
            .send_force(output.force)
            .and_then(|()| self.io.send_torque(output.torque));
        if let Err(err) = sent {
            if !self.write_failed {
                warn!(device = %self.name, error = %err, "device write failed");
                self.write_failed = true;
            }
        }
    }

    fn count_loop(&mut self, elapsed: Duration) {
        self.haptics_loops.fetch_add(1, Ordering::Relaxed);
        self.rate_window_loops += 1;
        if elapsed.saturating_sub(self.rate_window_start) >= Duration::from_secs(1) {
            publish(&self.fields.haptics_rate, self.rate_window_loops);
            self.rate_window_start = elapsed;
            self.rate_window_loops = 0;
        }
    }
}

impl<D: DeviceIo> RealtimeTask for DeviceLoop<D> {
    fn tick(&mut self, info: &TickInfo) -> CallbackCode {
        let (position, velocity, orientation, button) = self.sample();
        publish(&self.fields.device_position, position);
        publish(&self.fields.device_velocity, velocity);
        publish(&self.fields.device_orientation, orientation);
        publish(&self.fields.main_button, button);

        let calibration = self.fields.position_calibration.get();
        let orientation_calibration = self.fields.orientation_calibration.get();
        let input = EffectInput {
            position: calibration.transform_point(position),
            velocity: calibration.transform_vector(velocity),
            orientation: orientation_calibration * orientation,
            elapsed: info.elapsed,
        };
        let output = self.effects.lock().evaluate(&input, Instant::now());
        publish(&self.fields.force, output.force);
        publish(&self.fields.torque, output.torque);

        let to_device = calibration.rotation().inverse();
        self.send(EffectOutput {
            force: to_device.rotate(output.force),
            torque: to_device.rotate(output.torque),
        });

        self.count_loop(info.elapsed);
        CallbackCode::Continue
    }
}

// ----------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------

/// Object-safe view of a device, for owners of heterogeneous devices.
pub trait HapticsDevice: std::fmt::Debug {
    /// Device (node) name.
    fn name(&self) -> &str;
    /// The device node.
    fn node(&self) -> NodeId;
    /// Field handles.
    fn fields(&self) -> &DeviceFields;
    /// Lifecycle state.
    fn state(&self) -> DeviceState;
    /// True if running without hardware.
    fn is_degraded(&self) -> bool;
    /// Ticks run since the device was created.
    fn haptics_loops(&self) -> u64;
    /// Timing of the real-time thread, if running.
    fn tick_stats(&self) -> Option<TickStats>;

    /// Opens the device and starts its real-time thread.
    ///
    /// # Errors
    ///
    /// See [`ThreadedHapticsDevice::init_device`].
    fn init_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()>;

    /// Stops the real-time thread, then releases the device.
    ///
    /// # Errors
    ///
    /// See [`ThreadedHapticsDevice::disable_device`].
    fn disable_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()>;

    /// Pulls the real-time state into the scene graph.
    ///
    /// # Errors
    ///
    /// See [`ThreadedHapticsDevice::update_device_values`].
    fn update_device_values(&mut self, graph: &mut FieldGraph) -> DeviceResult<()>;

    /// Hands a new effect set to the real-time thread.
    ///
    /// # Errors
    ///
    /// See [`ThreadedHapticsDevice::render_effects`].
    fn render_effects(&mut self, effects: EffectVec) -> DeviceResult<()>;
}

/// A haptic device driven by its own real-time thread.
pub struct ThreadedHapticsDevice<D: DeviceIo> {
    name: String,
    node: NodeId,
    fields: DeviceFields,
    link: RtLink,
    realtime: RealtimeConfig,
    effects: Arc<Mutex<EffectBuffers>>,
    haptics_loops: Arc<AtomicU64>,
    io: Option<D>,
    thread: Option<RealtimeThread<DeviceLoop<D>>>,
    degraded: bool,
    last_update_values: Option<Instant>,
}

impl<D: DeviceIo> ThreadedHapticsDevice<D> {
    /// Creates the device node and its fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields cannot be created.
    pub fn new(
        graph: &mut FieldGraph,
        name: impl Into<String>,
        settings: &DeviceSettings,
        io: D,
    ) -> DeviceResult<Self> {
        Self::with_io(graph, name, settings, |_, _, _| Ok(io))
    }

    /// Like [`Self::new`], for backends that need fields of their own on
    /// the device node. `make_io` runs after the device fields exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields cannot be created or `make_io`
    /// fails. The node is removed again in that case.
    pub fn with_io<F>(
        graph: &mut FieldGraph,
        name: impl Into<String>,
        settings: &DeviceSettings,
        make_io: F,
    ) -> DeviceResult<Self>
    where
        F: FnOnce(&mut FieldGraph, &RtLink, NodeId) -> DeviceResult<D>,
    {
        let name = name.into();
        let link = RtLink::new(settings.realtime.command_capacity);
        let node = graph.add_node(NODE_TYPE, name.clone());

        let built = DeviceFields::create(graph, &link, node, settings).and_then(|fields| {
            let io = make_io(graph, &link, node)?;
            graph.initialize_node(node)?;
            Ok((fields, io))
        });
        let (fields, io) = match built {
            Ok(built) => built,
            Err(err) => {
                if graph.remove_node(node).is_err() {
                    debug!(device = %name, "device node already gone");
                }
                return Err(err);
            }
        };

        debug!(device = %name, "device node created");
        Ok(Self {
            name,
            node,
            fields,
            link,
            realtime: settings.realtime.clone(),
            effects: Arc::new(Mutex::new(EffectBuffers::new())),
            haptics_loops: Arc::new(AtomicU64::new(0)),
            io: Some(io),
            thread: None,
            degraded: false,
            last_update_values: None,
        })
    }

    /// Opens the device and starts the real-time thread.
    ///
    /// An open failure is logged and the device runs without hardware:
    /// zero position, no output, `initialized` stays false. Calling this
    /// on a running device does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned (the backend is
    /// lost with it) or the backend was lost earlier.
    pub fn init_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        if self.thread.is_some() {
            debug!(device = %self.name, "device already running");
            return Ok(());
        }
        let mut io = self
            .io
            .take()
            .ok_or_else(|| DeviceError::MissingIo(self.name.clone()))?;

        let opened = match io.open() {
            Ok(()) => true,
            Err(err) => {
                warn!(device = %self.name, error = %err, "device unavailable, rendering zero output");
                false
            }
        };

        let task = DeviceLoop {
            name: self.name.clone(),
            io,
            opened,
            fields: self.fields.realtime(),
            effects: Arc::clone(&self.effects),
            haptics_loops: Arc::clone(&self.haptics_loops),
            rate_window_start: Duration::ZERO,
            rate_window_loops: 0,
            write_failed: false,
        };
        let thread = RealtimeThread::spawn(
            format!("haptics-{}", self.name),
            &self.link,
            &self.realtime,
            task,
        )?;
        self.thread = Some(thread);
        self.degraded = !opened;

        graph.set_value_as(Caller::Node(self.node), self.fields.initialized, opened)?;
        info!(
            device = %self.name,
            rate_hz = self.realtime.rate_hz,
            degraded = !opened,
            "haptics device initialized"
        );
        Ok(())
    }

    /// Stops the real-time thread, then closes the device.
    ///
    /// The thread has exited before the backend is touched. A close
    /// failure is logged. Calling this on a stopped device does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the real-time thread panicked; the backend is
    /// lost in that case.
    pub fn disable_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let stopped = thread.stop();
        self.degraded = false;
        graph.set_value_as(Caller::Node(self.node), self.fields.initialized, false)?;

        let task = stopped?;
        let DeviceLoop { mut io, opened, .. } = task;
        if opened {
            if let Err(err) = io.close() {
                warn!(device = %self.name, error = %err, "device close failed");
            }
        }
        self.io = Some(io);
        info!(device = %self.name, "haptics device disabled");
        Ok(())
    }

    /// Pulls real-time writes into the scene graph and pushes pending
    /// main-thread changes down. Call once per scene-graph iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if a device field was removed from the graph.
    pub fn update_device_values(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        for id in self.fields.thread_safe_ids() {
            graph.up_to_date(id)?;
        }
        self.last_update_values = Some(Instant::now());
        Ok(())
    }

    /// Makes `effects` the active set. Returns once the real-time thread
    /// switched, between two ticks.
    ///
    /// # Errors
    ///
    /// Returns an error if the real-time thread died.
    pub fn render_effects(&mut self, effects: EffectVec) -> DeviceResult<()> {
        let buffers = Arc::clone(&self.effects);
        self.link
            .call_sync(move || buffers.lock().swap(effects, Instant::now()))?;
        Ok(())
    }

    /// Device name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device node.
    #[inline]
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Field handles.
    #[inline]
    #[must_use]
    pub const fn fields(&self) -> &DeviceFields {
        &self.fields
    }

    /// Link to the real-time thread.
    #[inline]
    #[must_use]
    pub const fn link(&self) -> &RtLink {
        &self.link
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> DeviceState {
        if self.thread.is_some() {
            DeviceState::Running
        } else {
            DeviceState::Uninitialized
        }
    }

    /// True if running without hardware.
    #[inline]
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Ticks run since the device was created.
    #[must_use]
    pub fn haptics_loops(&self) -> u64 {
        self.haptics_loops.load(Ordering::Relaxed)
    }

    /// Timing of the real-time thread, if running.
    #[must_use]
    pub fn tick_stats(&self) -> Option<TickStats> {
        self.thread.as_ref().map(RealtimeThread::stats)
    }

    /// When [`Self::update_device_values`] last ran.
    #[must_use]
    pub const fn last_update_values(&self) -> Option<Instant> {
        self.last_update_values
    }

    /// The backend, while no thread owns it.
    #[must_use]
    pub fn io(&self) -> Option<&D> {
        self.io.as_ref()
    }
}

impl<D: DeviceIo> HapticsDevice for ThreadedHapticsDevice<D> {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn fields(&self) -> &DeviceFields {
        &self.fields
    }

    fn state(&self) -> DeviceState {
        Self::state(self)
    }

    fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn haptics_loops(&self) -> u64 {
        Self::haptics_loops(self)
    }

    fn tick_stats(&self) -> Option<TickStats> {
        Self::tick_stats(self)
    }

    fn init_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        Self::init_device(self, graph)
    }

    fn disable_device(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        Self::disable_device(self, graph)
    }

    fn update_device_values(&mut self, graph: &mut FieldGraph) -> DeviceResult<()> {
        Self::update_device_values(self, graph)
    }

    fn render_effects(&mut self, effects: EffectVec) -> DeviceResult<()> {
        Self::render_effects(self, effects)
    }
}

impl<D: DeviceIo> Drop for ThreadedHapticsDevice<D> {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        match thread.stop() {
            Ok(DeviceLoop {
                mut io,
                opened: true,
                ..
            }) => {
                if let Err(err) = io.close() {
                    warn!(device = %self.name, error = %err, "device close failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(device = %self.name, error = %err, "device thread failed"),
        }
    }
}

impl<D: DeviceIo> std::fmt::Debug for ThreadedHapticsDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedHapticsDevice")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("state", &self.state())
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{ConstantForce, SpringEffect};
    use tactile_core::FieldError;

    #[derive(Default)]
    struct Recorded {
        forces: Vec<Vec3>,
        opened: bool,
        closed: bool,
    }

    struct ScriptedIo {
        position: Vec3,
        fail_open: bool,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl ScriptedIo {
        fn new(position: Vec3) -> (Self, Arc<Mutex<Recorded>>) {
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            let io = Self {
                position,
                fail_open: false,
                recorded: Arc::clone(&recorded),
            };
            (io, recorded)
        }
    }

    impl DeviceIo for ScriptedIo {
        fn open(&mut self) -> DeviceResult<()> {
            if self.fail_open {
                return Err(DeviceError::Open {
                    device: "scripted".into(),
                    reason: "unplugged".into(),
                });
            }
            self.recorded.lock().opened = true;
            Ok(())
        }

        fn close(&mut self) -> DeviceResult<()> {
            self.recorded.lock().closed = true;
            Ok(())
        }

        fn position(&mut self) -> Vec3 {
            self.position
        }

        fn velocity(&mut self) -> Vec3 {
            Vec3::ZERO
        }

        fn orientation(&mut self) -> Rotation {
            Rotation::IDENTITY
        }

        fn button_status(&mut self) -> bool {
            true
        }

        fn send_force(&mut self, force: Vec3) -> DeviceResult<()> {
            self.recorded.lock().forces.push(force);
            Ok(())
        }

        fn send_torque(&mut self, _torque: Vec3) -> DeviceResult<()> {
            Ok(())
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn device(graph: &mut FieldGraph, io: ScriptedIo) -> ThreadedHapticsDevice<ScriptedIo> {
        ThreadedHapticsDevice::new(graph, "Dev", &DeviceSettings::default(), io).unwrap()
    }

    #[test]
    fn test_fields_registered_on_node() {
        let mut graph = FieldGraph::new();
        let (io, _) = ScriptedIo::new(Vec3::ZERO);
        let dev = device(&mut graph, io);

        let names = graph.node_field_names(dev.node()).unwrap();
        for expected in [
            "devicePosition",
            "deviceOrientation",
            "mainButton",
            "trackerPosition",
            "weightedProxyPosition",
            "hapticsRate",
            "initialized",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(
            graph.full_name(dev.fields().tracker_position).unwrap(),
            "Dev.trackerPosition"
        );
        assert_eq!(dev.state(), DeviceState::Uninitialized);
    }

    #[test]
    fn test_tracker_applies_calibration() {
        let mut graph = FieldGraph::new();
        let (io, _) = ScriptedIo::new(Vec3::ZERO);
        let mut dev = device(&mut graph, io);
        let fields = dev.fields();

        let calibration = Matrix4::from_translation(Vec3::new(0.0, 1.0, 0.0))
            * Matrix4::from_scale(Vec3::new(2.0, 2.0, 2.0));
        fields
            .position_calibration
            .set(&mut graph, calibration)
            .unwrap();
        fields.device_position.realtime().set(Vec3::new(0.1, 0.0, 0.0));
        let tracker = fields.tracker_position;
        dev.update_device_values(&mut graph).unwrap();

        let position = graph.get_value::<Vec3>(tracker).unwrap();
        assert!(position.approx_eq(Vec3::new(0.2, 1.0, 0.0), 1e-12));
        assert!(dev.last_update_values().is_some());
    }

    #[test]
    fn test_weighted_proxy_blends_towards_proxy() {
        let mut graph = FieldGraph::new();
        let (io, _) = ScriptedIo::new(Vec3::ZERO);
        let dev = device(&mut graph, io);
        let fields = dev.fields();

        graph
            .set_value(fields.proxy_position, Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        graph.set_value(fields.proxy_weighting, 0.25f64).unwrap();

        let weighted = graph
            .get_value::<Vec3>(fields.weighted_proxy_position)
            .unwrap();
        assert!(weighted.approx_eq(Vec3::new(0.25, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn test_output_fields_reject_external_writes() {
        let mut graph = FieldGraph::new();
        let (io, _) = ScriptedIo::new(Vec3::ZERO);
        let dev = device(&mut graph, io);

        let result = dev.fields().device_position.set(&mut graph, Vec3::X);
        assert!(matches!(result, Err(FieldError::Access { .. })));
    }

    #[test]
    fn test_init_render_disable_cycle() {
        let mut graph = FieldGraph::new();
        let (io, recorded) = ScriptedIo::new(Vec3::new(0.01, 0.0, 0.0));
        let mut dev = device(&mut graph, io);

        dev.init_device(&mut graph).unwrap();
        assert_eq!(dev.state(), DeviceState::Running);
        assert!(!dev.is_degraded());
        assert!(graph.get_value::<bool>(dev.fields().initialized).unwrap());
        assert!(dev.io().is_none());

        dev.render_effects(vec![Arc::new(SpringEffect::new(Vec3::ZERO, 100.0))])
            .unwrap();
        wait_until(|| {
            recorded
                .lock()
                .forces
                .last()
                .is_some_and(|force| force.x < -0.5)
        });

        dev.update_device_values(&mut graph).unwrap();
        let position = dev.fields().device_position.get(&mut graph).unwrap();
        assert!(position.approx_eq(Vec3::new(0.01, 0.0, 0.0), 1e-12));
        assert!(dev.fields().main_button.get(&mut graph).unwrap());
        let force = dev.fields().force.get(&mut graph).unwrap();
        assert!(force.approx_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-9));
        assert!(dev.tick_stats().is_some());

        dev.disable_device(&mut graph).unwrap();
        assert_eq!(dev.state(), DeviceState::Uninitialized);
        assert!(!graph.get_value::<bool>(dev.fields().initialized).unwrap());
        assert!(dev.haptics_loops() > 0);
        let recorded = recorded.lock();
        assert!(recorded.opened && recorded.closed);
    }

    #[test]
    fn test_open_failure_runs_degraded() {
        let mut graph = FieldGraph::new();
        let (mut io, recorded) = ScriptedIo::new(Vec3::new(0.5, 0.5, 0.5));
        io.fail_open = true;
        let mut dev = device(&mut graph, io);

        dev.init_device(&mut graph).unwrap();
        assert!(dev.is_degraded());
        assert!(!graph.get_value::<bool>(dev.fields().initialized).unwrap());

        dev.render_effects(vec![Arc::new(ConstantForce {
            force: Vec3::X,
            ..ConstantForce::default()
        })])
        .unwrap();
        let start = dev.haptics_loops();
        wait_until(|| dev.haptics_loops() > start + 5);

        dev.update_device_values(&mut graph).unwrap();
        assert_eq!(
            dev.fields().device_position.get(&mut graph).unwrap(),
            Vec3::ZERO
        );
        dev.disable_device(&mut graph).unwrap();

        let recorded = recorded.lock();
        assert!(recorded.forces.is_empty());
        assert!(!recorded.closed);
    }

    #[test]
    fn test_force_sent_in_device_space() {
        let mut graph = FieldGraph::new();
        let (io, recorded) = ScriptedIo::new(Vec3::ZERO);
        let rotation = Rotation::from_axis_angle(Vec3::Z, std::f64::consts::FRAC_PI_2);
        let settings = DeviceSettings {
            position_calibration: Matrix4::from_rotation(rotation),
            ..DeviceSettings::default()
        };
        let mut dev = ThreadedHapticsDevice::new(&mut graph, "Rotated", &settings, io).unwrap();

        dev.render_effects(vec![Arc::new(ConstantForce {
            force: Vec3::X,
            ..ConstantForce::default()
        })])
        .unwrap();
        dev.init_device(&mut graph).unwrap();
        wait_until(|| !recorded.lock().forces.is_empty());
        dev.disable_device(&mut graph).unwrap();

        let sent = recorded.lock().forces[0];
        assert!(rotation.rotate(sent).approx_eq(Vec3::X, 1e-9));
    }

    #[test]
    fn test_disable_twice_and_reinit() {
        let mut graph = FieldGraph::new();
        let (io, recorded) = ScriptedIo::new(Vec3::ZERO);
        let mut dev = device(&mut graph, io);

        dev.disable_device(&mut graph).unwrap();
        dev.init_device(&mut graph).unwrap();
        dev.init_device(&mut graph).unwrap();
        dev.disable_device(&mut graph).unwrap();
        dev.disable_device(&mut graph).unwrap();
        assert!(dev.io().is_some());

        recorded.lock().closed = false;
        dev.init_device(&mut graph).unwrap();
        drop(dev);
        assert!(recorded.lock().closed);
    }
}
