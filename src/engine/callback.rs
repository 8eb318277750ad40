// SPDX-License-Identifier: GPL-3.0-only

//! Outbound notifications
//!
//! The engine reports everything observable through [`EngineCallback`]. All
//! methods default to doing nothing. [`ChannelCallback`] forwards them as
//! [`EngineEvent`]s over a tokio channel.

use super::controls::{Audio, AudioCodec, Facing, Location, PictureFormat, PointF, VideoCodec};
use super::options::CameraOptions;
use crate::errors::CameraError;
use crate::frame::Frame;
use crate::size::Size;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// A captured picture
///
/// Filled in two steps: the engine fills the request fields, the recorder
/// adds `size`, `rotation` and `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureResult {
    pub is_snapshot: bool,
    pub location: Option<Location>,
    pub facing: Facing,
    pub format: PictureFormat,
    /// Clockwise rotation to apply for an upright picture
    pub rotation: i32,
    pub size: Size,
    pub data: Vec<u8>,
}

impl PictureResult {
    pub fn request(is_snapshot: bool, location: Option<Location>, facing: Facing, format: PictureFormat) -> Self {
        Self {
            is_snapshot,
            location,
            facing,
            format,
            rotation: 0,
            size: Size::default(),
            data: Vec::new(),
        }
    }
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoEndReason {
    #[default]
    User,
    MaxSizeReached,
    MaxDurationReached,
}

/// A recorded video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoResult {
    pub is_snapshot: bool,
    pub location: Option<Location>,
    pub facing: Facing,
    pub file: PathBuf,
    pub rotation: i32,
    pub size: Size,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub audio: Audio,
    pub max_size_bytes: u64,
    pub max_duration_ms: u64,
    pub video_bit_rate: u32,
    pub audio_bit_rate: u32,
    pub video_frame_rate: i32,
    pub end_reason: VideoEndReason,
}

impl VideoResult {
    pub fn request(is_snapshot: bool, location: Option<Location>, facing: Facing, file: PathBuf) -> Self {
        Self {
            is_snapshot,
            location,
            facing,
            file,
            rotation: 0,
            size: Size::default(),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
            audio: Audio::default(),
            max_size_bytes: 0,
            max_duration_ms: 0,
            video_bit_rate: 0,
            audio_bit_rate: 0,
            video_frame_rate: 0,
            end_reason: VideoEndReason::default(),
        }
    }
}

/// Receiver of engine notifications
///
/// Called from engine and hardware threads; implementations must not block.
pub trait EngineCallback: Send + Sync {
    fn on_camera_opened(&self, _options: &CameraOptions) {}

    fn on_camera_closed(&self) {}

    fn on_camera_error(&self, _error: &CameraError) {}

    /// The shutter fired; `play_sound` tells whether a sound is expected
    fn on_shutter(&self, _play_sound: bool) {}

    fn on_picture_taken(&self, _result: PictureResult) {}

    fn on_video_taken(&self, _result: VideoResult) {}

    fn on_video_recording_start(&self) {}

    fn on_video_recording_end(&self) {}

    fn on_focus_start(&self, _point: Option<PointF>) {}

    fn on_focus_end(&self, _success: bool, _point: Option<PointF>) {}

    fn on_zoom_changed(&self, _zoom: f32, _points: Option<&[PointF]>) {}

    fn on_exposure_correction_changed(&self, _value: f32, _bounds: [f32; 2], _points: Option<&[PointF]>) {}

    fn on_preview_stream_size_changed(&self) {}

    /// A preview frame for processors; dropping it returns the buffer
    fn on_frame(&self, _frame: Frame) {}
}

/// Callback that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl EngineCallback for NoopCallback {}

/// Owned form of every callback
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CameraOpened,
    CameraClosed,
    CameraError(CameraError),
    Shutter { play_sound: bool },
    PictureTaken(PictureResult),
    VideoTaken(VideoResult),
    VideoRecordingStart,
    VideoRecordingEnd,
    FocusStart(Option<PointF>),
    FocusEnd { success: bool, point: Option<PointF> },
    ZoomChanged(f32),
    ExposureCorrectionChanged(f32),
    PreviewStreamSizeChanged,
    Frame { time_ms: i64, size: Size },
}

/// Forwards callbacks into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    sender: UnboundedSender<EngineEvent>,
}

impl ChannelCallback {
    pub fn new(sender: UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl EngineCallback for ChannelCallback {
    fn on_camera_opened(&self, _options: &CameraOptions) {
        self.send(EngineEvent::CameraOpened);
    }

    fn on_camera_closed(&self) {
        self.send(EngineEvent::CameraClosed);
    }

    fn on_camera_error(&self, error: &CameraError) {
        self.send(EngineEvent::CameraError(error.clone()));
    }

    fn on_shutter(&self, play_sound: bool) {
        self.send(EngineEvent::Shutter { play_sound });
    }

    fn on_picture_taken(&self, result: PictureResult) {
        self.send(EngineEvent::PictureTaken(result));
    }

    fn on_video_taken(&self, result: VideoResult) {
        self.send(EngineEvent::VideoTaken(result));
    }

    fn on_video_recording_start(&self) {
        self.send(EngineEvent::VideoRecordingStart);
    }

    fn on_video_recording_end(&self) {
        self.send(EngineEvent::VideoRecordingEnd);
    }

    fn on_focus_start(&self, point: Option<PointF>) {
        self.send(EngineEvent::FocusStart(point));
    }

    fn on_focus_end(&self, success: bool, point: Option<PointF>) {
        self.send(EngineEvent::FocusEnd { success, point });
    }

    fn on_zoom_changed(&self, zoom: f32, _points: Option<&[PointF]>) {
        self.send(EngineEvent::ZoomChanged(zoom));
    }

    fn on_exposure_correction_changed(&self, value: f32, _bounds: [f32; 2], _points: Option<&[PointF]>) {
        self.send(EngineEvent::ExposureCorrectionChanged(value));
    }

    fn on_preview_stream_size_changed(&self) {
        self.send(EngineEvent::PreviewStreamSizeChanged);
    }

    fn on_frame(&self, frame: Frame) {
        self.send(EngineEvent::Frame {
            time_ms: frame.time_ms(),
            size: frame.size(),
        });
    }
}
