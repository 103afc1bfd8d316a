//! # TACTILE
//!
//! Engine context for the field/route runtime: builds the scene graph and
//! the haptic devices from a TOML configuration, runs scene-graph
//! iterations and shuts the device threads down before the graph goes.
//!
//! ```rust,ignore
//! use tactile::{EngineConfig, EngineContext};
//!
//! let mut engine = EngineContext::from_config(EngineConfig::load("tactile.toml")?)?;
//! engine.initialize_devices()?;
//! for _ in 0..600 {
//!     engine.iterate()?;
//! }
//! engine.shutdown()?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod error;

pub use config::{ConfigError, DeviceConfig, DeviceKind, EngineConfig, SceneConfig};
pub use context::{DeviceReport, EngineContext, IterationStats, IterationStatsAccumulator};
pub use error::{EngineError, EngineResult};
