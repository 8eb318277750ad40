// SPDX-License-Identifier: GPL-3.0-only

//! Session device API
//!
//! Cameras are opened asynchronously. An open device configures a capture
//! session over a fixed set of output streams, then receives capture
//! requests: one repeating request that drives the preview and occasional
//! single captures. Every request reports a [`CaptureResult`] carrying the
//! auto exposure, focus and white balance states.

use crate::engine::controls::{FrameFormat, Location, PictureFormat};
use crate::engine::metering::Rect;
use crate::engine::options::FpsRange;
use crate::errors::{CameraError, ErrorReason};
use crate::preview::SurfaceId;
use crate::size::Size;
use std::fmt;
use std::sync::Arc;

/// Lens facing constants reported in [`SessionCharacteristics::lens_facing`]
pub const LENS_FACING_FRONT: i32 = 0;
pub const LENS_FACING_BACK: i32 = 1;

/// Errors raised by the session API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Disabled by policy
    Disabled,
    InUse,
    MaxCamerasInUse,
    /// The device reported a fatal error
    CameraError,
    Disconnected,
    /// The output configuration was rejected
    ConfigureFailed(String),
    /// A call was rejected, usually for a closed device or session
    Runtime(String),
}

impl SessionError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            SessionError::Disabled | SessionError::InUse | SessionError::MaxCamerasInUse => {
                ErrorReason::FailedToConnect
            }
            SessionError::CameraError | SessionError::Disconnected => ErrorReason::Disconnected,
            SessionError::ConfigureFailed(_) => ErrorReason::FailedToStartPreview,
            SessionError::Runtime(_) => ErrorReason::Unknown,
        }
    }

    pub fn with_reason(&self, reason: ErrorReason) -> CameraError {
        CameraError::new(reason, self.to_string())
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Disabled => write!(f, "camera disabled"),
            SessionError::InUse => write!(f, "camera in use"),
            SessionError::MaxCamerasInUse => write!(f, "too many cameras in use"),
            SessionError::CameraError => write!(f, "camera device error"),
            SessionError::Disconnected => write!(f, "camera disconnected"),
            SessionError::ConfigureFailed(msg) => write!(f, "session configuration failed: {}", msg),
            SessionError::Runtime(msg) => write!(f, "camera call failed: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SessionError> for CameraError {
    fn from(err: SessionError) -> Self {
        let reason = err.reason();
        CameraError::new(reason, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareLevel {
    /// Runs on top of a legacy driver; triggers and locks are unreliable
    Legacy,
    Limited,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
    OnAutoFlashRedeye,
}

impl AeMode {
    /// Auto exposure runs in this mode
    pub fn is_on(&self) -> bool {
        !matches!(self, AeMode::Off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashMode {
    Off,
    Single,
    Torch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    CloudyDaylight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneMode {
    Disabled,
    Hdr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    PassiveUnfocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwbState {
    Inactive,
    Searching,
    Converged,
    Locked,
}

/// Request templates; the builder remembers the one it was created from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    Preview,
    Record,
    StillCapture,
}

/// Metering rectangle in sensor array pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteringRectangle {
    pub rect: Rect,
    pub weight: i32,
}

impl MeteringRectangle {
    /// Weight for areas that only reset metering
    pub const WEIGHT_DONT_CARE: i32 = 0;
}

/// Role of an output stream in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Preview,
    Picture,
    FrameProcessing,
    Recorder,
}

/// Image produced on a reader stream
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub size: Size,
    pub timestamp_ms: i64,
}

pub type ImageCallback = Arc<dyn Fn(Image) + Send + Sync>;

/// What a reader stream produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Rendered onto the application surface
    Surface(SurfaceId),
    Picture(PictureFormat),
    Frames(FrameFormat),
    /// Consumed by a video recorder
    Encoder,
}

/// One output of a capture session
#[derive(Clone)]
pub struct StreamConfig {
    pub role: StreamRole,
    pub format: StreamFormat,
    pub size: Size,
    /// Images the reader can hold before the sensor stalls
    pub capacity: usize,
    pub on_image: Option<ImageCallback>,
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("role", &self.role)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Mutable capture request
///
/// `None` leaves a control to the device. Triggers are one-shot: they must be
/// cleared once handled so later requests do not fire them again.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: Template,
    pub targets: Vec<StreamRole>,
    pub ae_mode: Option<AeMode>,
    pub flash_mode: Option<FlashMode>,
    pub awb_mode: Option<AwbMode>,
    pub scene_mode: Option<SceneMode>,
    pub af_mode: Option<AfMode>,
    pub lens_focus_distance: Option<f32>,
    pub crop_region: Option<Rect>,
    pub ae_exposure_compensation: i32,
    pub ae_target_fps_range: Option<FpsRange>,
    pub ae_regions: Option<Vec<MeteringRectangle>>,
    pub af_regions: Option<Vec<MeteringRectangle>>,
    pub awb_regions: Option<Vec<MeteringRectangle>>,
    pub af_trigger: Option<Trigger>,
    pub ae_precapture_trigger: Option<Trigger>,
    pub ae_lock: bool,
    pub awb_lock: bool,
    pub jpeg_gps_location: Option<Location>,
    pub jpeg_orientation: i32,
}

impl CaptureRequest {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            targets: Vec::new(),
            ae_mode: Some(AeMode::On),
            flash_mode: Some(FlashMode::Off),
            awb_mode: Some(AwbMode::Auto),
            scene_mode: Some(SceneMode::Disabled),
            af_mode: None,
            lens_focus_distance: None,
            crop_region: None,
            ae_exposure_compensation: 0,
            ae_target_fps_range: None,
            ae_regions: None,
            af_regions: None,
            awb_regions: None,
            af_trigger: None,
            ae_precapture_trigger: None,
            ae_lock: false,
            awb_lock: false,
            jpeg_gps_location: None,
            jpeg_orientation: 0,
        }
    }

    pub fn add_target(&mut self, role: StreamRole) {
        if !self.targets.contains(&role) {
            self.targets.push(role);
        }
    }

    pub fn remove_target(&mut self, role: StreamRole) {
        self.targets.retain(|r| *r != role);
    }

    pub fn has_target(&self, role: StreamRole) -> bool {
        self.targets.contains(&role)
    }
}

/// Result of one capture
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureResult {
    pub frame_number: u64,
    pub ae_state: Option<AeState>,
    pub af_state: Option<AfState>,
    pub awb_state: Option<AwbState>,
    pub af_mode: Option<AfMode>,
    pub af_trigger: Option<Trigger>,
    pub ae_precapture_trigger: Option<Trigger>,
}

/// Static description of a camera
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCharacteristics {
    pub name: String,
    pub lens_facing: i32,
    pub sensor_orientation: i32,
    pub hardware_level: HardwareLevel,
    /// Sensor pixel array; crop and metering regions are expressed in it
    pub active_array: Size,
    pub max_digital_zoom: f32,
    pub ae_compensation_range: (i32, i32),
    pub ae_compensation_step: f32,
    pub ae_available_modes: Vec<AeMode>,
    pub af_available_modes: Vec<AfMode>,
    pub awb_available_modes: Vec<AwbMode>,
    pub scene_modes: Vec<SceneMode>,
    pub flash_available: bool,
    pub fps_ranges: Vec<FpsRange>,
    pub max_regions_ae: usize,
    pub max_regions_af: usize,
    pub max_regions_awb: usize,
    pub raw_supported: bool,
    pub preview_sizes: Vec<Size>,
    pub jpeg_sizes: Vec<Size>,
    pub raw_sizes: Vec<Size>,
    pub frame_sizes: Vec<Size>,
    pub frame_formats: Vec<FrameFormat>,
    pub recorder_sizes: Vec<Size>,
    /// Largest size the recorder profiles accept
    pub max_video_size: Option<Size>,
}

impl SessionCharacteristics {
    /// Output sizes for pictures of `format`
    pub fn picture_sizes(&self, format: PictureFormat) -> &[Size] {
        match format {
            PictureFormat::Jpeg => &self.jpeg_sizes,
            PictureFormat::Dng => &self.raw_sizes,
        }
    }
}

/// Receives results of submitted requests, on a driver thread
pub trait CaptureListener: Send + Sync {
    fn on_capture_started(&self, _request: &CaptureRequest) {}

    fn on_capture_completed(&self, request: &CaptureRequest, result: &CaptureResult);

    fn on_capture_failed(&self, _request: &CaptureRequest) {}
}

/// A configured set of output streams
pub trait CaptureSession: Send + Sync {
    /// Replace the repeating request
    fn set_repeating_request(
        &self,
        request: &CaptureRequest,
        listener: Arc<dyn CaptureListener>,
    ) -> Result<(), SessionError>;

    /// Submit one request in between repeating ones
    fn capture(&self, request: &CaptureRequest, listener: Option<Arc<dyn CaptureListener>>)
    -> Result<(), SessionError>;

    fn stop_repeating(&self) -> Result<(), SessionError>;

    fn close(&self);
}

pub type SessionCallback = Box<dyn FnOnce(Result<Arc<dyn CaptureSession>, SessionError>) + Send>;
pub type OpenCallback = Box<dyn FnOnce(Result<Arc<dyn SessionDevice>, SessionError>) + Send>;
/// Reports errors of an already opened device
pub type DeviceErrorCallback = Arc<dyn Fn(SessionError) + Send + Sync>;

/// An open camera
pub trait SessionDevice: Send + Sync {
    fn id(&self) -> &str;

    fn create_request(&self, template: Template) -> Result<CaptureRequest, SessionError>;

    /// Configure `outputs`; the result arrives through `callback`
    fn create_session(&self, outputs: Vec<StreamConfig>, callback: SessionCallback) -> Result<(), SessionError>;

    /// Blocks until the device is free
    fn close(&self);
}

/// Entry point of the session API
pub trait SessionCameraApi: Send + Sync {
    fn camera_ids(&self) -> Result<Vec<String>, SessionError>;

    fn characteristics(&self, id: &str) -> Result<SessionCharacteristics, SessionError>;

    /// Open `id`; the result arrives through `callback`
    fn open(&self, id: &str, callback: OpenCallback, on_error: DeviceErrorCallback) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_errors_fail_to_connect() {
        for error in [SessionError::Disabled, SessionError::InUse, SessionError::MaxCamerasInUse] {
            let camera_error: CameraError = error.into();
            assert_eq!(camera_error.reason, ErrorReason::FailedToConnect);
        }
        for error in [SessionError::CameraError, SessionError::Disconnected] {
            assert_eq!(error.reason(), ErrorReason::Disconnected);
        }
        assert_eq!(SessionError::Runtime("closed".into()).reason(), ErrorReason::Unknown);
    }

    #[test]
    fn test_request_targets_are_unique() {
        let mut request = CaptureRequest::new(Template::Preview);
        request.add_target(StreamRole::Preview);
        request.add_target(StreamRole::Preview);
        request.add_target(StreamRole::FrameProcessing);
        assert_eq!(request.targets.len(), 2);
        request.remove_target(StreamRole::Preview);
        assert!(!request.has_target(StreamRole::Preview));
        assert!(request.has_target(StreamRole::FrameProcessing));
    }
}
