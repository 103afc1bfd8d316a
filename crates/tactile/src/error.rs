//! # Engine Error Types

use tactile_core::FieldError;
use tactile_haptics::DeviceError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the engine context.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A field operation failed.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// A device operation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// No device with this name.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
