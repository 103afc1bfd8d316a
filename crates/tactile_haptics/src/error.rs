//! # Device Error Types
//!
//! Errors of the device layer. Device I/O errors are reported by the hooks
//! of a [`DeviceIo`](crate::DeviceIo) backend; the loop logs them and
//! keeps running with zero output.

use tactile_core::{FieldError, RealtimeError};
use thiserror::Error;

/// Errors that can occur while driving a haptic device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device SDK refused to open the device.
    #[error("failed to open device {device}: {reason}")]
    Open {
        /// Device name.
        device: String,
        /// Backend message.
        reason: String,
    },

    /// The device SDK failed to release the device.
    #[error("failed to close device {device}: {reason}")]
    Close {
        /// Device name.
        device: String,
        /// Backend message.
        reason: String,
    },

    /// A force or torque could not be sent.
    #[error("failed to write to device {device}: {reason}")]
    Write {
        /// Device name.
        device: String,
        /// Backend message.
        reason: String,
    },

    /// The I/O backend was lost with a crashed real-time thread.
    #[error("device {0} has no I/O backend")]
    MissingIo(String),

    /// The real-time thread or its link failed.
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    /// A device field operation failed.
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_device() {
        let err = DeviceError::Open {
            device: "Phantom0".into(),
            reason: "no such device".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to open device Phantom0: no such device"
        );
        assert_eq!(
            DeviceError::MissingIo("Phantom0".into()).to_string(),
            "device Phantom0 has no I/O backend"
        );
    }

    #[test]
    fn test_wrapped_errors_are_transparent() {
        let err: DeviceError = RealtimeError::Disconnected.into();
        assert_eq!(err.to_string(), RealtimeError::Disconnected.to_string());
    }
}
