// SPDX-License-Identifier: MPL-2.0

//! File video recorder
//!
//! Writes a simple frame container at the source frame rate until stopped or
//! until the size or duration limit of the request is reached. Stands in for
//! a hardware encoder. Snapshot recordings composite the overlay into every
//! frame payload.

use super::overlay::{self, Overlay, OverlayTarget};
use super::photo::compute_crop;
use super::{RecorderListener, VideoRecorder, VideoSource};
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::engine::callback::{VideoEndReason, VideoResult};
use crate::errors::{EngineError, ErrorReason};
use crate::size::{AspectRatio, Size};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Container magic
const MAGIC: &[u8; 6] = b"CEVID\0";

/// Payload bytes written per frame
const FRAME_PAYLOAD: usize = 64;

const DEFAULT_FRAME_RATE: i32 = 30;

struct RecordingState {
    writer: Option<BufWriter<File>>,
    stub: VideoResult,
    frames: u64,
    bytes: u64,
    started: Instant,
}

struct Recording {
    state: Mutex<RecordingState>,
    listener: Arc<dyn RecorderListener>,
    overlay: Option<Arc<dyn Overlay>>,
    size: Size,
    rotation: i32,
}

impl Recording {
    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one frame; returns the end reason once a limit is hit
    fn write_frame(&self) -> Result<Option<VideoEndReason>, std::io::Error> {
        let payload = self.frame_payload();
        let mut state = self.state();
        let max_duration = state.stub.max_duration_ms;
        let max_size = state.stub.max_size_bytes;
        if max_duration > 0 && state.started.elapsed() >= Duration::from_millis(max_duration) {
            return Ok(Some(VideoEndReason::MaxDurationReached));
        }
        let chunk = (8 + FRAME_PAYLOAD) as u64;
        if max_size > 0 && state.bytes + chunk > max_size {
            return Ok(Some(VideoEndReason::MaxSizeReached));
        }
        let index = state.frames;
        let Some(writer) = state.writer.as_mut() else {
            return Ok(None);
        };
        writer.write_all(&index.to_le_bytes())?;
        writer.write_all(&payload)?;
        state.frames += 1;
        state.bytes += chunk;
        Ok(None)
    }

    /// Overlay layers laid end to end, truncated to the payload
    fn frame_payload(&self) -> [u8; FRAME_PAYLOAD] {
        let mut payload = [0u8; FRAME_PAYLOAD];
        let layers = overlay::render(self.overlay.as_deref(), OverlayTarget::VideoSnapshot, self.size, self.rotation);
        for (slot, byte) in payload.iter_mut().zip(layers.iter().flatten()) {
            *slot = *byte;
        }
        payload
    }

    /// Close the file and report; only the first call does anything
    fn finish(&self, reason: VideoEndReason, error: Option<std::io::Error>) {
        let (writer, mut stub, frames) = {
            let mut state = self.state();
            let Some(writer) = state.writer.take() else {
                return;
            };
            (writer, state.stub.clone(), state.frames)
        };

        self.listener.on_video_recording_end();
        let closed = match error {
            Some(e) => Err(e),
            None => close(writer, frames),
        };
        match closed {
            Ok(()) => {
                info!(file = %stub.file.display(), frames, reason = ?reason, "Video recorded");
                stub.end_reason = reason;
                self.listener.on_video_result(Ok(stub));
            }
            Err(e) => {
                warn!(file = %stub.file.display(), error = %e, "Video recording failed");
                self.listener.on_video_result(Err(EngineError::camera(
                    ErrorReason::VideoFailed,
                    e.to_string(),
                )));
            }
        }
    }
}

fn close(mut writer: BufWriter<File>, frames: u64) -> Result<(), std::io::Error> {
    writer.write_all(&frames.to_le_bytes())?;
    writer.flush()
}

/// Records into the file named by the request
pub struct FileVideoRecorder {
    source: VideoSource,
    snapshot_ratio: Option<AspectRatio>,
    overlay: Option<Arc<dyn Overlay>>,
    recording: Option<Arc<Recording>>,
    frame_loop: Option<CaptureLoopController>,
}

impl FileVideoRecorder {
    /// `snapshot_ratio` is set for recorders fed from the preview stream
    pub fn new(source: VideoSource, snapshot_ratio: Option<AspectRatio>) -> Self {
        Self {
            source,
            snapshot_ratio,
            overlay: None,
            recording: None,
            frame_loop: None,
        }
    }

    pub fn with_overlay(mut self, overlay: Option<Arc<dyn Overlay>>) -> Self {
        self.overlay = overlay;
        self
    }
}

impl VideoRecorder for FileVideoRecorder {
    fn start(&mut self, mut stub: VideoResult, listener: Arc<dyn RecorderListener>) {
        let size = match self.snapshot_ratio {
            Some(ratio) => compute_crop(self.source.size, ratio).2,
            None => self.source.size,
        };
        let frame_rate = if self.source.frame_rate > 0 {
            self.source.frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        stub.size = size;
        stub.rotation = self.source.rotation;
        stub.video_frame_rate = frame_rate;

        let opened = File::create(&stub.file).and_then(|file| {
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            writer.write_all(&(size.width as u32).to_le_bytes())?;
            writer.write_all(&(size.height as u32).to_le_bytes())?;
            writer.write_all(&(frame_rate as u32).to_le_bytes())?;
            writer.write_all(&(self.source.rotation as u32).to_le_bytes())?;
            Ok(writer)
        });
        let writer = match opened {
            Ok(writer) => writer,
            Err(e) => {
                warn!(file = %stub.file.display(), error = %e, "Cannot open video file");
                listener.on_video_result(Err(EngineError::camera(
                    ErrorReason::VideoFailed,
                    e.to_string(),
                )));
                return;
            }
        };

        debug!(file = %stub.file.display(), size = %size, frame_rate, "Video recording started");
        let recording = Arc::new(Recording {
            state: Mutex::new(RecordingState {
                writer: Some(writer),
                stub,
                frames: 0,
                bytes: 0,
                started: Instant::now(),
            }),
            listener: Arc::clone(&listener),
            overlay: self.overlay.clone(),
            size,
            rotation: self.source.rotation,
        });
        listener.on_video_recording_start();

        let interval = Duration::from_secs(1) / frame_rate as u32;
        let looped = Arc::clone(&recording);
        self.frame_loop = Some(CaptureLoopController::start_periodic(
            "video-recorder",
            interval,
            move || match looped.write_frame() {
                Ok(None) => LoopAction::Continue,
                Ok(Some(reason)) => {
                    looped.finish(reason, None);
                    LoopAction::Stop
                }
                Err(e) => {
                    looped.finish(VideoEndReason::User, Some(e));
                    LoopAction::Stop
                }
            },
        ));
        self.recording = Some(recording);
    }

    fn stop(&mut self, is_user: bool) {
        debug!(is_user, "Stopping video recorder");
        if let Some(frame_loop) = self.frame_loop.as_mut() {
            frame_loop.stop();
        }
        self.frame_loop = None;
        if let Some(recording) = self.recording.take() {
            recording.finish(VideoEndReason::User, None);
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
            .as_ref()
            .map(|r| r.state().writer.is_some())
            .unwrap_or(false)
    }
}

impl Drop for FileVideoRecorder {
    fn drop(&mut self) {
        if self.recording.is_some() {
            self.stop(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::callback::PictureResult;
    use crate::engine::controls::Facing;
    use crate::errors::EngineResult;
    use crate::pipelines::overlay::OverlayCanvas;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
        results: Mutex<Vec<EngineResult<VideoResult>>>,
    }

    impl RecorderListener for RecordingListener {
        fn on_picture_shutter(&self, _did_play_sound: bool) {}
        fn on_picture_result(&self, _result: EngineResult<PictureResult>) {}
        fn on_video_recording_start(&self) {
            self.events.lock().unwrap().push("start".into());
        }
        fn on_video_recording_end(&self) {
            self.events.lock().unwrap().push("end".into());
        }
        fn on_video_result(&self, result: EngineResult<VideoResult>) {
            self.events.lock().unwrap().push("result".into());
            self.results.lock().unwrap().push(result);
        }
    }

    fn create_test_source() -> VideoSource {
        VideoSource {
            size: Size::new(1920, 1080),
            rotation: 90,
            frame_rate: 100,
        }
    }

    #[test]
    fn test_record_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.vid");
        let listener = Arc::new(RecordingListener::default());
        let mut recorder = FileVideoRecorder::new(create_test_source(), None);

        recorder.start(
            VideoResult::request(false, None, Facing::Back, file.clone()),
            listener.clone(),
        );
        assert!(recorder.is_recording());
        std::thread::sleep(Duration::from_millis(50));
        recorder.stop(true);
        assert!(!recorder.is_recording());

        assert_eq!(*listener.events.lock().unwrap(), vec!["start", "end", "result"]);
        let results = listener.results.lock().unwrap();
        let result = results[0].as_ref().unwrap();
        assert_eq!(result.size, Size::new(1920, 1080));
        assert_eq!(result.rotation, 90);
        assert_eq!(result.end_reason, VideoEndReason::User);
        let bytes = std::fs::read(&file).unwrap();
        assert_eq!(&bytes[..6], MAGIC);
    }

    #[test]
    fn test_max_duration_ends_recording() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let mut recorder = FileVideoRecorder::new(create_test_source(), Some(AspectRatio::new(1, 1)));

        let mut stub = VideoResult::request(true, None, Facing::Front, dir.path().join("snap.vid"));
        stub.max_duration_ms = 30;
        recorder.start(stub, listener.clone());

        let deadline = Instant::now() + Duration::from_secs(2);
        while listener.results.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let results = listener.results.lock().unwrap();
        let result = results[0].as_ref().unwrap();
        assert_eq!(result.end_reason, VideoEndReason::MaxDurationReached);
        assert_eq!(result.size, Size::new(1080, 1080));
        drop(results);

        // Stopping afterwards reports nothing new
        recorder.stop(true);
        assert_eq!(listener.results.lock().unwrap().len(), 1);
    }

    struct Stamp;

    impl Overlay for Stamp {
        fn draws_on(&self, target: OverlayTarget) -> bool {
            target == OverlayTarget::VideoSnapshot
        }

        fn draw_on(&self, _target: OverlayTarget, canvas: &mut OverlayCanvas) {
            canvas.draw(format!("stamp {}", canvas.size()));
        }
    }

    #[test]
    fn test_overlay_is_written_into_frames() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("overlay.vid");
        let listener = Arc::new(RecordingListener::default());
        let mut recorder = FileVideoRecorder::new(create_test_source(), Some(AspectRatio::new(1, 1)))
            .with_overlay(Some(Arc::new(Stamp)));

        recorder.start(VideoResult::request(true, None, Facing::Back, file.clone()), listener.clone());
        std::thread::sleep(Duration::from_millis(50));
        recorder.stop(true);

        let bytes = std::fs::read(&file).unwrap();
        // Header is the magic and four u32 fields, then frame index and payload
        let header = MAGIC.len() + 16;
        assert!(bytes.len() > header + 8 + FRAME_PAYLOAD);
        let payload = &bytes[header + 8..header + 8 + FRAME_PAYLOAD];
        let stamp = b"stamp 1080x1080";
        assert_eq!(&payload[..stamp.len()], stamp);
        assert!(payload[stamp.len()..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_unwritable_file_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let mut recorder = FileVideoRecorder::new(create_test_source(), None);
        let file = dir.path().join("missing").join("clip.vid");
        recorder.start(VideoResult::request(false, None, Facing::Back, file), listener.clone());

        assert!(!recorder.is_recording());
        let results = listener.results.lock().unwrap();
        assert_eq!(results[0].as_ref().unwrap_err().reason(), ErrorReason::VideoFailed);
    }
}
