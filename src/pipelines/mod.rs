// SPDX-License-Identifier: MPL-2.0

//! Picture and video recorders
//!
//! Recorders turn a capture request into a result. Full-resolution pictures
//! come from the hardware and are recorded by the backends themselves;
//! snapshots and videos are produced by the recorders a [`RecorderFactory`]
//! creates. An optional [`overlay::Overlay`] is composited onto snapshots.
//!
//! # Flow
//!
//! ```text
//! ┌────────────┐  take()/start()  ┌────────────┐   listener    ┌─────────────┐
//! │  Backend   │ ───────────────▶ │  Recorder  │ ────────────▶ │   Engine    │
//! │ (job)      │                  │ (own task) │  (any thread) │ (new job)   │
//! └────────────┘                  └────────────┘               └─────────────┘
//! ```
//!
//! Listeners only schedule work on the engine; they never block.

pub mod overlay;
pub mod photo;
pub mod video;

use crate::engine::callback::{PictureResult, VideoResult};
use crate::errors::EngineResult;
use crate::size::{AspectRatio, Size};
use overlay::Overlay;
use std::sync::Arc;

/// Receives recorder progress; called from recorder threads
pub trait RecorderListener: Send + Sync {
    fn on_picture_shutter(&self, did_play_sound: bool);

    fn on_picture_result(&self, result: EngineResult<PictureResult>);

    fn on_video_recording_start(&self);

    fn on_video_recording_end(&self);

    fn on_video_result(&self, result: EngineResult<VideoResult>);
}

pub trait PictureRecorder: Send {
    /// Start capturing `stub`; the outcome goes to `listener`
    fn take(&mut self, stub: PictureResult, listener: Arc<dyn RecorderListener>);
}

pub trait VideoRecorder: Send {
    /// Start recording `stub` into its file
    ///
    /// Progress and the final result, including a failure to start, go to
    /// `listener`.
    fn start(&mut self, stub: VideoResult, listener: Arc<dyn RecorderListener>);

    /// Stop and finalize; `is_user` tells whether the user asked for it
    fn stop(&mut self, is_user: bool);

    fn is_recording(&self) -> bool;
}

/// What a picture snapshot is cut from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotRequest {
    /// Largest snapshot in the `Output` reference
    pub uncropped: Size,
    /// Ratio the result is cropped to
    pub ratio: AspectRatio,
    /// Clockwise rotation from sensor to output
    pub rotation: i32,
}

/// What the recorder receives frames from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSource {
    /// Encoded size in the `Output` reference
    pub size: Size,
    pub rotation: i32,
    pub frame_rate: i32,
}

/// Creates the recorders the engine does not implement itself
pub trait RecorderFactory: Send + Sync {
    fn picture_snapshot(&self, request: SnapshotRequest) -> Box<dyn PictureRecorder>;

    fn full_video(&self, source: VideoSource) -> Box<dyn VideoRecorder>;

    fn snapshot_video(&self, source: VideoSource, ratio: AspectRatio) -> Box<dyn VideoRecorder>;
}

/// Factory for the built-in placeholder encoders
#[derive(Default, Clone)]
pub struct DefaultRecorderFactory {
    overlay: Option<Arc<dyn Overlay>>,
}

impl DefaultRecorderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composite `overlay` onto picture and video snapshots
    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

impl RecorderFactory for DefaultRecorderFactory {
    fn picture_snapshot(&self, request: SnapshotRequest) -> Box<dyn PictureRecorder> {
        Box::new(photo::SnapshotPictureRecorder::new(request, self.overlay.clone()))
    }

    fn full_video(&self, source: VideoSource) -> Box<dyn VideoRecorder> {
        Box::new(video::FileVideoRecorder::new(source, None))
    }

    fn snapshot_video(&self, source: VideoSource, ratio: AspectRatio) -> Box<dyn VideoRecorder> {
        Box::new(video::FileVideoRecorder::new(source, Some(ratio)).with_overlay(self.overlay.clone()))
    }
}
