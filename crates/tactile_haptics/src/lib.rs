//! # TACTILE Haptics
//!
//! The real-time side of the engine: one thread per haptic device,
//! sampling the device and rendering forces at a fixed rate while the
//! scene graph runs at its own pace.
//!
//! ## Architecture Rules
//!
//! 1. **Hooks only** - a backend implements [`DeviceIo`] and nothing else;
//!    the loop, fields and calibration are shared
//! 2. **Degrade, never stall** - I/O failures are logged once and the
//!    loop keeps running with zero output
//! 3. **Thread first** - `disable_device` joins the real-time thread
//!    before the backend is closed
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tactile_core::{FieldGraph, Vec3};
//! use tactile_haptics::{fake_device, DeviceSettings, SpringEffect};
//!
//! let mut graph = FieldGraph::new();
//! let (mut device, controls) = fake_device(&mut graph, "Fake", &DeviceSettings::default(), false)?;
//! device.init_device(&mut graph)?;
//! device.render_effects(vec![Arc::new(SpringEffect::new(Vec3::ZERO, 200.0))])?;
//! controls.set_position.set(&mut graph, Vec3::new(0.01, 0.0, 0.0))?;
//! device.update_device_values(&mut graph)?;
//! device.disable_device(&mut graph)?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod device;
pub mod effect;
pub mod error;
pub mod fake;

pub use device::{
    DeviceFields, DeviceIo, DeviceSettings, DeviceState, HapticsDevice, ThreadedHapticsDevice,
    NODE_TYPE,
};
pub use effect::{
    ConstantForce, EffectBuffers, EffectInput, EffectOutput, EffectVec, ForceEffect, SpringEffect,
};
pub use error::{DeviceError, DeviceResult};
pub use fake::{fake_device, FakeControls, FakeDevice, FakeDeviceIo};
