// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use crate::engine::controls::{Facing, PictureFormat};
use serde::{Deserialize, Serialize};

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Synchronous single-object device API
    #[default]
    Legacy,
    /// Session-based request API with asynchronous results
    Session,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Legacy, BackendKind::Session];
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Legacy => write!(f, "legacy"),
            BackendKind::Session => write!(f, "session"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(BackendKind::Legacy),
            "session" => Ok(BackendKind::Session),
            other => Err(format!("unknown backend '{}', expected legacy or session", other)),
        }
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at various angles relative to the device.
/// This is common on mobile devices where sensors are rotated 90° or 270° relative
/// to the display orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Camera device as reported by the hardware API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Identifier the hardware API opens the device with
    pub id: String,
    pub name: String,
    pub facing: Facing,
    /// Clockwise mounting angle of the sensor
    pub sensor_orientation: i32,
}

impl CameraDevice {
    pub fn rotation(&self) -> SensorRotation {
        SensorRotation::from_degrees_int(self.sensor_orientation)
    }
}

impl std::fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {}, sensor {})", self.name, self.id, self.facing, self.rotation())
    }
}

/// What has to restart when the preview stream size changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartScope {
    Preview,
    Bind,
}

/// Static traits of a backend the engine consults before scheduling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Picture formats the backend can ever produce
    pub picture_formats: Vec<PictureFormat>,
    pub preview_restart: RestartScope,
    /// Frame processing changes require rebinding
    pub rebind_for_frame_processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Session".parse::<BackendKind>(), Ok(BackendKind::Session));
        assert_eq!(" legacy ".parse::<BackendKind>(), Ok(BackendKind::Legacy));
        assert!("usb".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Session.to_string(), "session");
    }

    #[test]
    fn test_sensor_rotation_normalised() {
        assert_eq!(SensorRotation::from_degrees_int(-90), SensorRotation::Rotate270);
        assert_eq!(SensorRotation::from_degrees_int(450).degrees(), 90);
    }
}
