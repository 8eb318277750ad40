// SPDX-License-Identifier: GPL-3.0-only

//! Legacy device API
//!
//! One object per open camera. Calls are synchronous; preview frames,
//! focus results, pictures and errors arrive through callbacks on driver
//! threads. Parameters are read as a whole, edited, and written back.

use crate::engine::controls::{FrameFormat, Location};
use crate::engine::metering::Rect;
use crate::errors::{CameraError, ErrorReason};
use crate::preview::SurfaceId;
use crate::size::Size;
use std::fmt;
use std::sync::Arc;

/// Facing constants reported in [`LegacyCameraInfo::facing`]
pub const CAMERA_FACING_BACK: i32 = 0;
pub const CAMERA_FACING_FRONT: i32 = 1;

/// Error codes raised by the device or its service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyError {
    /// The media server died; every open camera is gone
    ServerDied,
    /// Another client took the camera
    Evicted,
    /// Unspecified driver error
    Unknown,
    /// The camera could not be opened
    Connect(String),
    /// A call was rejected, usually for the current device state
    Runtime(String),
}

impl LegacyError {
    /// Reason for errors delivered through the error callback
    pub fn reason(&self) -> ErrorReason {
        match self {
            LegacyError::ServerDied | LegacyError::Evicted | LegacyError::Unknown => ErrorReason::Disconnected,
            LegacyError::Connect(_) => ErrorReason::FailedToConnect,
            LegacyError::Runtime(_) => ErrorReason::Unknown,
        }
    }

    /// Camera error with an explicit reason, for failures of a given step
    pub fn with_reason(&self, reason: ErrorReason) -> CameraError {
        CameraError::new(reason, self.to_string())
    }
}

impl fmt::Display for LegacyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyError::ServerDied => write!(f, "camera server died"),
            LegacyError::Evicted => write!(f, "camera evicted by another client"),
            LegacyError::Unknown => write!(f, "unknown camera error"),
            LegacyError::Connect(msg) => write!(f, "failed to connect: {}", msg),
            LegacyError::Runtime(msg) => write!(f, "camera call failed: {}", msg),
        }
    }
}

impl std::error::Error for LegacyError {}

impl From<LegacyError> for CameraError {
    fn from(err: LegacyError) -> Self {
        let reason = err.reason();
        CameraError::new(reason, err.to_string())
    }
}

/// Static description of a camera, available without opening it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCameraInfo {
    pub facing: i32,
    /// Clockwise mounting angle of the sensor
    pub orientation: i32,
    pub can_disable_shutter_sound: bool,
    pub name: String,
}

/// Weighted focus or metering area in the -1000..1000 square
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub rect: Rect,
    pub weight: i32,
}

/// Device parameters, read and written as a whole
///
/// String valued modes use the constants in the mapper module. Sizes are
/// in the sensor reference and fps ranges are scaled by 1000.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyParameters {
    pub supported_preview_sizes: Vec<Size>,
    pub supported_picture_sizes: Vec<Size>,
    /// `None` when videos record at preview sizes
    pub supported_video_sizes: Option<Vec<Size>>,
    /// Largest size the recorder profiles accept
    pub max_video_size: Option<Size>,
    pub preview_size: Option<Size>,
    pub picture_size: Option<Size>,
    pub preview_format: Option<FrameFormat>,
    pub supported_flash_modes: Option<Vec<String>>,
    pub flash_mode: Option<String>,
    pub supported_white_balance: Option<Vec<String>>,
    pub white_balance: Option<String>,
    pub supported_scene_modes: Option<Vec<String>>,
    pub scene_mode: Option<String>,
    pub supported_focus_modes: Vec<String>,
    pub focus_mode: Option<String>,
    pub zoom_supported: bool,
    pub max_zoom: i32,
    pub zoom: i32,
    pub min_exposure_compensation: i32,
    pub max_exposure_compensation: i32,
    pub exposure_compensation_step: f32,
    pub exposure_compensation: i32,
    pub supported_preview_fps_ranges: Vec<[i32; 2]>,
    pub preview_fps_range: Option<[i32; 2]>,
    pub max_num_focus_areas: usize,
    pub max_num_metering_areas: usize,
    pub focus_areas: Vec<Area>,
    pub metering_areas: Vec<Area>,
    pub gps: Option<Location>,
    pub recording_hint: bool,
    /// Clockwise rotation applied to captured pictures
    pub rotation: i32,
}

pub type PreviewCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(LegacyError) + Send + Sync>;
pub type AutoFocusCallback = Box<dyn FnOnce(bool) + Send>;
pub type ShutterCallback = Box<dyn FnOnce() + Send>;
pub type PictureCallback = Box<dyn FnOnce(Result<Vec<u8>, LegacyError>) + Send>;

/// An open camera
pub trait LegacyCamera: Send + Sync {
    fn parameters(&self) -> Result<LegacyParameters, LegacyError>;

    fn set_parameters(&self, params: &LegacyParameters) -> Result<(), LegacyError>;

    /// Not allowed while previewing
    fn set_display_orientation(&self, degrees: i32) -> Result<(), LegacyError>;

    fn set_preview_target(&self, surface: Option<SurfaceId>) -> Result<(), LegacyError>;

    /// Frames are written into buffers queued with [`add_callback_buffer`];
    /// without a free buffer the frame is skipped.
    ///
    /// [`add_callback_buffer`]: LegacyCamera::add_callback_buffer
    fn set_preview_callback(&self, callback: Option<PreviewCallback>);

    fn add_callback_buffer(&self, buffer: Vec<u8>);

    fn start_preview(&self) -> Result<(), LegacyError>;

    fn stop_preview(&self) -> Result<(), LegacyError>;

    fn auto_focus(&self, callback: AutoFocusCallback) -> Result<(), LegacyError>;

    fn cancel_auto_focus(&self);

    /// Capture a picture; the preview stops and must be restarted afterwards
    fn take_picture(&self, shutter: ShutterCallback, jpeg: PictureCallback) -> Result<(), LegacyError>;

    /// Returns false when the device refuses to change the sound
    fn enable_shutter_sound(&self, enabled: bool) -> Result<bool, LegacyError>;

    /// Take the camera back from a recorder
    fn lock(&self) -> Result<(), LegacyError>;

    /// Hand the camera to a recorder
    fn unlock(&self) -> Result<(), LegacyError>;

    fn set_error_callback(&self, callback: Option<ErrorCallback>);

    /// Blocks until the device is free; the camera is unusable afterwards
    fn release(&self);
}

/// Entry point of the legacy API
pub trait LegacyCameraApi: Send + Sync {
    fn camera_count(&self) -> usize;

    fn camera_info(&self, index: usize) -> Option<LegacyCameraInfo>;

    fn open(&self, index: usize) -> Result<Arc<dyn LegacyCamera>, LegacyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_errors_disconnect() {
        for error in [LegacyError::ServerDied, LegacyError::Evicted, LegacyError::Unknown] {
            let camera_error: CameraError = error.into();
            assert_eq!(camera_error.reason, ErrorReason::Disconnected);
            assert!(camera_error.is_unrecoverable());
        }
        let runtime: CameraError = LegacyError::Runtime("busy".into()).into();
        assert_eq!(runtime.reason, ErrorReason::Unknown);
    }

    #[test]
    fn test_with_reason_keeps_message() {
        let error = LegacyError::Runtime("no surface".into());
        let camera_error = error.with_reason(ErrorReason::FailedToStartPreview);
        assert_eq!(camera_error.reason, ErrorReason::FailedToStartPreview);
        assert!(camera_error.message.contains("no surface"));
    }
}
