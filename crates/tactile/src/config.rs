//! # Engine Configuration
//!
//! Loaded once at startup from TOML. Every section is optional:
//!
//! ```toml
//! [scene]
//! target_fps = 60
//!
//! [realtime]
//! rate_hz = 1000
//! spin_threshold_us = 200
//! command_capacity = 64
//!
//! [[device]]
//! name = "FakeDevice0"
//! kind = "fake"
//! proxy_weighting = 0.95
//! calibration_scale = 1.0
//! calibration_translation = [0.0, 0.0, 0.0]
//! fail_open = false
//!
//! [spring]
//! spring_constant = 100.0
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tactile_core::{Matrix4, RealtimeConfig, Rotation, Vec3};
use tactile_haptics::{DeviceSettings, SpringEffect};
use thiserror::Error;

/// Errors raised while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Scene-graph loop settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Scene-graph iterations per second.
    pub target_fps: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { target_fps: 60 }
    }
}

/// Supported device backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Scripted device without hardware.
    #[default]
    Fake,
}

/// One `[[device]]` entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Node name, unique.
    pub name: String,
    /// Backend.
    pub kind: DeviceKind,
    /// Initial `proxyWeighting`, in `[0, 1]`.
    pub proxy_weighting: f64,
    /// Uniform scale of the position calibration.
    pub calibration_scale: f64,
    /// Translation of the position calibration.
    pub calibration_translation: [f64; 3],
    /// Fake backend only: fail to open.
    pub fail_open: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "FakeDevice0".to_string(),
            kind: DeviceKind::Fake,
            proxy_weighting: 0.95,
            calibration_scale: 1.0,
            calibration_translation: [0.0; 3],
            fail_open: false,
        }
    }
}

impl DeviceConfig {
    /// `translation × scale`, device space to world space.
    #[must_use]
    pub fn position_calibration(&self) -> Matrix4 {
        let scale = self.calibration_scale;
        Matrix4::from_translation(Vec3::from_array(self.calibration_translation))
            * Matrix4::from_scale(Vec3::new(scale, scale, scale))
    }

    /// Construction parameters for this device.
    #[must_use]
    pub fn settings(&self, realtime: &RealtimeConfig) -> DeviceSettings {
        DeviceSettings {
            realtime: realtime.clone(),
            proxy_weighting: self.proxy_weighting,
            position_calibration: self.position_calibration(),
            orientation_calibration: Rotation::IDENTITY,
        }
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scene-graph loop.
    pub scene: SceneConfig,
    /// Real-time threads, shared by all devices.
    pub realtime: RealtimeConfig,
    /// Devices, in start order.
    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
    /// Spring effect installed by the demo.
    pub spring: SpringEffect,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scene: SceneConfig::default(),
            realtime: RealtimeConfig::default(),
            devices: vec![DeviceConfig::default()],
            spring: SpringEffect::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), devices = config.devices.len(), "configuration loaded");
        Ok(config)
    }

    /// Checks value ranges and name uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scene.target_fps == 0 {
            return Err(ConfigError::Invalid(
                "scene.target_fps must be positive".to_string(),
            ));
        }
        if self.realtime.rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "realtime.rate_hz must be positive".to_string(),
            ));
        }
        if self.realtime.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "realtime.command_capacity must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !(0.0..=1.0).contains(&device.proxy_weighting) {
                return Err(ConfigError::Invalid(format!(
                    "device {}: proxy_weighting {} outside [0, 1]",
                    device.name, device.proxy_weighting
                )));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device name {} used twice",
                    device.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.scene.target_fps, 60);
        assert_eq!(config.realtime.rate_hz, 1000);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].name, "FakeDevice0");
    }

    #[test]
    fn test_full_document() {
        let text = r#"
            [scene]
            target_fps = 30

            [realtime]
            rate_hz = 500

            [[device]]
            name = "Left"
            calibration_scale = 2.0
            calibration_translation = [0.0, 1.0, 0.0]

            [[device]]
            name = "Right"
            kind = "fake"
            fail_open = true

            [spring]
            spring_constant = 250.0
            damping = 1.5
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();

        assert_eq!(config.scene.target_fps, 30);
        assert_eq!(config.realtime.rate_hz, 500);
        assert_eq!(config.realtime.command_capacity, 64);
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices[1].fail_open);
        assert!((config.spring.damping - 1.5).abs() < f64::EPSILON);

        let calibration = config.devices[0].position_calibration();
        let world = calibration.transform_point(Vec3::new(0.1, 0.0, 0.0));
        assert!(world.approx_eq(Vec3::new(0.2, 1.0, 0.0), 1e-12));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for text in [
            "[scene]\ntarget_fps = 0",
            "[realtime]\nrate_hz = 0",
            "[realtime]\ncommand_capacity = 0",
            "[[device]]\nproxy_weighting = 1.5",
        ] {
            let result = EngineConfig::from_toml_str(text);
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = "[[device]]\nname = \"A\"\n[[device]]\nname = \"A\"\n";
        let err = EngineConfig::from_toml_str(text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: device name A used twice"
        );
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let result = EngineConfig::from_toml_str("[[device]]\nkind = \"phantom\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::load("/nonexistent/tactile.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
