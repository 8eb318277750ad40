// SPDX-License-Identifier: GPL-3.0-only

//! Legacy camera backend
//!
//! Drives devices that expose one synchronous object per camera. Parameters
//! are edited as a whole and written back; preview frames arrive through a
//! callback into buffers recycled by the [`FrameManager`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │    LegacyBackend    │  ← Implements CameraBackend trait
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    LegacyCamera     │  ← Parameters, preview buffers, focus, pictures
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   LegacyCameraApi   │  ← Device enumeration and open
//! └─────────────────────┘
//! ```

pub mod device;
pub mod mapper;
mod picture;
mod simulated;

pub use device::{LegacyCamera, LegacyCameraApi, LegacyCameraInfo, LegacyError, LegacyParameters};
pub use simulated::{SimulatedLegacyApi, SimulatedLegacyCamera};

use self::device::{Area, PreviewCallback};
use self::mapper::{FOCUS_MODE_AUTO, default_focus_mode, map_facing, map_flash, map_hdr, map_white_balance, unmap_facing};
use self::picture::{FullPictureRecorder, PreviewResume};
use super::types::*;
use super::CameraBackend;
use crate::constants::{jobs, timing};
use crate::engine::angles::{Axis, Reference};
use crate::engine::callback::{PictureResult, VideoResult};
use crate::engine::controls::{Facing, FrameFormat, Mode, PictureFormat, PointF};
use crate::engine::metering::{MeteringRegions, legacy_transform};
use crate::engine::options::CameraOptions;
use crate::engine::params::ParameterChange;
use crate::engine::{CameraState, EngineContext};
use crate::errors::{EngineError, EngineResult, ErrorReason};
use crate::frame::{BufferCallback, FrameManager};
use crate::pipelines::PictureRecorder;
use crate::size::{AspectRatio, Size};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

fn camera_error(error: LegacyError) -> EngineError {
    EngineError::Camera(error.into())
}

fn failed(reason: ErrorReason) -> impl Fn(LegacyError) -> EngineError {
    move |error| EngineError::Camera(error.with_reason(reason))
}

/// Legacy device backend implementation
pub struct LegacyBackend {
    api: Arc<dyn LegacyCameraApi>,
    ctx: Arc<EngineContext>,
    /// Index of the camera picked by `collect_camera_info`
    camera_index: usize,
    camera: Option<Arc<dyn LegacyCamera>>,
    frames: Option<FrameManager>,
    preview_callback: Option<PreviewCallback>,
}

impl LegacyBackend {
    pub fn new(api: Arc<dyn LegacyCameraApi>, ctx: Arc<EngineContext>) -> Self {
        Self {
            api,
            ctx,
            camera_index: 0,
            camera: None,
            frames: None,
            preview_callback: None,
        }
    }

    fn camera(&self) -> EngineResult<Arc<dyn LegacyCamera>> {
        self.camera
            .clone()
            .ok_or_else(|| EngineError::Precondition("legacy camera is not open".to_string()))
    }

    /// Report driver errors to the engine
    fn error_callback(&self) -> device::ErrorCallback {
        let ctx = Arc::downgrade(&self.ctx);
        Arc::new(move |e: LegacyError| {
            if let Some(ctx) = ctx.upgrade() {
                error!(error = %e, "Legacy camera error");
                ctx.dispatch_error("legacy camera error", camera_error(e));
            }
        })
    }

    /// Hand released frame buffers back to the device while it is running
    fn buffer_callback(&self, camera: &Arc<dyn LegacyCamera>) -> BufferCallback {
        let ctx = Arc::downgrade(&self.ctx);
        let camera = Arc::downgrade(camera);
        Arc::new(move |buffer: Vec<u8>| {
            let (Some(ctx), Some(camera)) = (ctx.upgrade(), camera.upgrade()) else {
                return;
            };
            if ctx.state().is_at_least(CameraState::Engine) && ctx.target_state().is_at_least(CameraState::Engine) {
                camera.add_callback_buffer(buffer);
            }
        })
    }

    fn frame_callback(&self, frames: FrameManager) -> PreviewCallback {
        let ctx = Arc::downgrade(&self.ctx);
        Arc::new(move |data: Vec<u8>| {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            let time_ms = chrono::Utc::now().timestamp_millis();
            // Unprocessed frames are dropped here and their buffer recycled
            if let Some(frame) = frames.get_frame(data, time_ms)
                && ctx.has_frame_processors()
            {
                ctx.callback().on_frame(frame);
            }
        })
    }

    fn apply_default_focus(&self, params: &mut LegacyParameters) {
        let mode = self.ctx.core().params.mode;
        if let Some(focus) = default_focus_mode(params, mode) {
            params.focus_mode = Some(focus.to_string());
        }
    }

    /// Write `change` into `params`; false when the device can't express it
    fn write_change(params: &mut LegacyParameters, change: ParameterChange) -> bool {
        match change {
            ParameterChange::Flash(flash) => params.flash_mode = Some(map_flash(flash).to_string()),
            ParameterChange::WhiteBalance(wb) => params.white_balance = Some(map_white_balance(wb).to_string()),
            ParameterChange::Hdr(hdr) => params.scene_mode = Some(map_hdr(hdr).to_string()),
            ParameterChange::Zoom(zoom) => params.zoom = (zoom * params.max_zoom as f32) as i32,
            ParameterChange::ExposureCorrection(ev) => {
                if params.exposure_compensation_step <= 0.0 {
                    return false;
                }
                params.exposure_compensation = ((ev / params.exposure_compensation_step).round() as i32)
                    .clamp(params.min_exposure_compensation, params.max_exposure_compensation);
            }
            ParameterChange::PreviewFrameRate { range, .. } => {
                let native = params
                    .supported_preview_fps_ranges
                    .iter()
                    .copied()
                    .find(|[min, max]| min / 1000 == range.min && max / 1000 == range.max)
                    .unwrap_or([range.min * 1000, range.max * 1000]);
                params.preview_fps_range = Some(native);
            }
            ParameterChange::Location(location) => params.gps = location,
            ParameterChange::PlaySounds(_) => return false,
        }
        true
    }

    fn apply_play_sounds(&self, camera: &dyn LegacyCamera, play: bool) -> EngineResult<bool> {
        let can_disable = self
            .api
            .camera_info(self.camera_index)
            .is_some_and(|info| info.can_disable_shutter_sound);
        if can_disable {
            return camera.enable_shutter_sound(play).or_else(|e| {
                warn!(error = %e, "Could not change shutter sound");
                Ok(false)
            });
        }
        // The sound can't be turned off, so only playing it is honoured
        Ok(play)
    }

    fn schedule_focus_end_fallback(&self, point: PointF) {
        let ctx = Arc::downgrade(&self.ctx);
        let orchestrator = self.ctx.orchestrator();
        orchestrator.remove(jobs::FOCUS_END);
        let _ = orchestrator.schedule_delayed(jobs::FOCUS_END, true, timing::AUTOFOCUS_END_DELAY, move || async move {
            if let Some(ctx) = ctx.upgrade() {
                debug!("No auto focus result in time");
                ctx.callback().on_focus_end(false, Some(point));
            }
            Ok(())
        });
    }
}

/// Called from the device thread when auto focus completes
fn on_auto_focus_result(ctx: &Arc<EngineContext>, camera: Weak<dyn LegacyCamera>, success: bool, point: PointF) {
    let orchestrator = ctx.orchestrator();
    orchestrator.remove(jobs::FOCUS_END);
    orchestrator.remove(jobs::FOCUS_RESET);

    let weak = Arc::downgrade(ctx);
    let _ = orchestrator.schedule("auto focus result", true, move || async move {
        let Some(ctx) = weak.upgrade() else {
            return Ok(());
        };
        debug!(success, "Auto focus finished");
        ctx.callback().on_focus_end(success, Some(point));
        schedule_focus_reset(&ctx, camera);
        Ok(())
    });
}

/// Return to the default focus after the configured delay
fn schedule_focus_reset(ctx: &Arc<EngineContext>, camera: Weak<dyn LegacyCamera>) {
    let delay = ctx.core().settings.auto_focus_reset_delay();
    if delay.is_zero() {
        return;
    }
    let weak = Arc::downgrade(ctx);
    let _ = ctx
        .orchestrator()
        .schedule_stateful_delayed(jobs::FOCUS_RESET, CameraState::Engine, delay, move || async move {
            let (Some(ctx), Some(camera)) = (weak.upgrade(), camera.upgrade()) else {
                return Ok(());
            };
            camera.cancel_auto_focus();
            let mut params = camera.parameters().map_err(camera_error)?;
            if params.max_num_focus_areas > 0 {
                params.focus_areas.clear();
            }
            if params.max_num_metering_areas > 0 {
                params.metering_areas.clear();
            }
            let mode = ctx.core().params.mode;
            if let Some(focus) = default_focus_mode(&params, mode) {
                params.focus_mode = Some(focus.to_string());
            }
            camera.set_parameters(&params).map_err(camera_error)?;
            debug!("Focus reset to default");
            Ok(())
        });
}

impl CameraBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            picture_formats: vec![PictureFormat::Jpeg],
            preview_restart: RestartScope::Preview,
            rebind_for_frame_processing: false,
        }
    }

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        let devices: Vec<CameraDevice> = (0..self.api.camera_count())
            .filter_map(|index| {
                let info = self.api.camera_info(index)?;
                Some(CameraDevice {
                    id: index.to_string(),
                    name: info.name,
                    facing: unmap_facing(info.facing)?,
                    sensor_orientation: info.orientation,
                })
            })
            .collect();
        debug!(count = devices.len(), "Enumerated legacy cameras");
        devices
    }

    fn collect_camera_info(&mut self, facing: Facing) -> bool {
        let internal = map_facing(facing);
        let count = self.api.camera_count();
        info!(facing = %facing, internal, count, "Collecting camera info");
        for index in 0..count {
            let Some(info) = self.api.camera_info(index) else {
                continue;
            };
            if info.facing == internal {
                self.ctx.core().angles.set_sensor_offset(facing, info.orientation);
                self.camera_index = index;
                return true;
            }
        }
        false
    }

    fn on_start_engine(&mut self) -> BoxFuture<'_, EngineResult<CameraOptions>> {
        async move {
            let camera = self.api.open(self.camera_index).map_err(|e| {
                error!(error = %e, "Failed to connect, maybe in use by another client");
                failed(ErrorReason::FailedToConnect)(e)
            })?;
            camera.set_error_callback(Some(self.error_callback()));
            // Stored before anything else can fail so stop_engine releases it
            self.camera = Some(Arc::clone(&camera));

            let mut params = camera.parameters().map_err(failed(ErrorReason::FailedToConnect))?;
            let (flip, mode, display) = {
                let core = self.ctx.core();
                (
                    core.angles.flip(Reference::Sensor, Reference::View),
                    core.params.mode,
                    core.angles.offset(Reference::Sensor, Reference::View, Axis::Absolute),
                )
            };
            let options = mapper::build_options(self.api.as_ref(), &params, flip);
            params.recording_hint = mode == Mode::Video;
            self.apply_default_focus(&mut params);
            camera
                .set_parameters(&params)
                .map_err(failed(ErrorReason::FailedToConnect))?;
            // Not allowed once the preview runs
            camera
                .set_display_orientation(display)
                .map_err(failed(ErrorReason::FailedToConnect))?;
            info!(index = self.camera_index, "Legacy camera opened");
            Ok(options)
        }
        .boxed()
    }

    fn on_start_bind(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let camera = self.camera()?;
            camera
                .set_preview_target(self.ctx.preview().surface_id())
                .map_err(failed(ErrorReason::FailedToStartPreview))?;
            let available = self.preview_stream_available_sizes();
            self.ctx.compute_bind_sizes(&available)?;
            Ok(())
        }
        .boxed()
    }

    fn on_start_preview(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let camera = self.camera()?;
            self.ctx.callback().on_preview_stream_size_changed();
            self.ctx.preview().set_draw_rotation(0);

            let (preview_size, picture_size, pool_size, angles) = {
                let core = self.ctx.core();
                let preview_size = core
                    .preview_stream_size
                    .ok_or_else(|| EngineError::Precondition("preview stream size not computed".to_string()))?;
                // Pictures stay available in video mode
                let picture_size = match core.params.mode {
                    Mode::Picture => core
                        .capture_size
                        .ok_or_else(|| EngineError::Precondition("capture size not computed".to_string()))?,
                    Mode::Video => core.compute_capture_size(Mode::Picture)?,
                };
                (preview_size, picture_size, core.settings.frame_processing_pool_size, core.angles.clone())
            };

            let mut params = camera
                .parameters()
                .map_err(failed(ErrorReason::FailedToStartPreview))?;
            params.preview_format = Some(FrameFormat::Nv21);
            params.preview_size = Some(preview_size);
            params.picture_size = Some(picture_size);
            camera
                .set_parameters(&params)
                .map_err(failed(ErrorReason::FailedToStartPreview))?;

            self.ctx.compute_frame_processing_size(&[preview_size])?;
            let frames = FrameManager::new(pool_size, Some(self.buffer_callback(&camera)));
            let callback = self.frame_callback(frames.clone());
            camera.set_preview_callback(Some(Arc::clone(&callback)));
            frames.set_up(FrameFormat::Nv21, preview_size, &angles);
            self.frames = Some(frames);
            self.preview_callback = Some(callback);

            camera
                .start_preview()
                .map_err(failed(ErrorReason::FailedToStartPreview))?;
            info!(size = %preview_size, "Legacy preview started");
            Ok(())
        }
        .boxed()
    }

    fn on_stop_preview(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let recorder = {
                let mut core = self.ctx.core();
                core.picture_recorder = None;
                core.video_recorder.take()
            };
            if let Some(mut recorder) = recorder {
                recorder.stop(false);
            }
            if let Some(frames) = self.frames.take() {
                frames.release();
            }
            self.preview_callback = None;
            if let Some(camera) = &self.camera {
                camera.set_preview_callback(None);
                if let Err(e) = camera.stop_preview() {
                    warn!(error = %e, "Could not stop preview");
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn on_stop_bind(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            if let Some(camera) = &self.camera
                && let Err(e) = camera.set_preview_target(None)
            {
                warn!(error = %e, "Could not release preview target");
            }
            Ok(())
        }
        .boxed()
    }

    fn on_stop_engine(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let orchestrator = self.ctx.orchestrator();
            orchestrator.remove(jobs::FOCUS_RESET);
            orchestrator.remove(jobs::FOCUS_END);
            self.frames = None;
            self.preview_callback = None;
            if let Some(camera) = self.camera.take() {
                camera.set_error_callback(None);
                info!("Releasing legacy camera");
                // Release blocks on the device
                if let Err(e) = tokio::task::spawn_blocking(move || camera.release()).await {
                    warn!(error = %e, "Exception while releasing camera");
                }
                info!("Released legacy camera");
            }
            Ok(())
        }
        .boxed()
    }

    fn preview_stream_available_sizes(&self) -> Vec<Size> {
        let Some(camera) = &self.camera else {
            return Vec::new();
        };
        match camera.parameters() {
            Ok(params) => {
                let mut sizes: Vec<Size> = Vec::with_capacity(params.supported_preview_sizes.len());
                for size in params.supported_preview_sizes {
                    if !sizes.contains(&size) {
                        sizes.push(size);
                    }
                }
                sizes
            }
            Err(e) => {
                warn!(error = %e, "Failed to read preview sizes");
                Vec::new()
            }
        }
    }

    fn frame_processing_available_sizes(&self) -> Vec<Size> {
        self.ctx.core().preview_stream_size.into_iter().collect()
    }

    fn apply_parameter(&mut self, change: ParameterChange) -> BoxFuture<'_, EngineResult<bool>> {
        async move {
            let camera = self.camera()?;
            if let ParameterChange::PlaySounds(play) = change {
                return self.apply_play_sounds(camera.as_ref(), play);
            }
            let mut params = camera.parameters().map_err(camera_error)?;
            if !Self::write_change(&mut params, change) {
                return Ok(false);
            }
            camera.set_parameters(&params).map_err(camera_error)?;
            debug!(change = ?change, "Legacy parameter applied");
            Ok(true)
        }
        .boxed()
    }

    fn take_picture(&mut self, mut stub: PictureResult, _do_metering: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let camera = self.camera()?;
            let resume = {
                let core = self.ctx.core();
                stub.rotation = core.angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor);
                stub.size = core
                    .picture_size(Reference::Output)
                    .ok_or_else(|| EngineError::Precondition("picture size not computed".to_string()))?;
                PreviewResume {
                    callback: self.preview_callback.clone(),
                    frames: self.frames.clone(),
                    size: core
                        .preview_stream_size
                        .ok_or_else(|| EngineError::Precondition("preview stream size not computed".to_string()))?,
                    angles: core.angles.clone(),
                }
            };

            let mut params = camera.parameters().map_err(camera_error)?;
            params.rotation = stub.rotation;
            camera.set_parameters(&params).map_err(camera_error)?;

            debug!(size = %stub.size, rotation = stub.rotation, "Taking legacy picture");
            let mut recorder = FullPictureRecorder::new(camera, &self.ctx, resume);
            recorder.take(stub, self.ctx.recorder_listener());
            self.ctx.core().picture_recorder = Some(Box::new(recorder));
            Ok(())
        }
        .boxed()
    }

    fn take_picture_snapshot(
        &mut self,
        stub: PictureResult,
        ratio: AspectRatio,
        _do_metering: bool,
    ) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.ctx.record_picture_snapshot(stub, ratio) }.boxed()
    }

    fn take_video(&mut self, stub: VideoResult) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let camera = self.camera()?;
            let source = self.ctx.full_video_source()?;
            if let Err(e) = camera.unlock() {
                warn!(error = %e, "Could not hand the camera to the recorder");
                self.ctx
                    .recorder_listener()
                    .on_video_result(Err(EngineError::camera(ErrorReason::VideoFailed, e.to_string())));
                return Ok(());
            }
            let recorder = self.ctx.recorders().full_video(source);
            self.ctx.start_video_recorder(recorder, stub);
            Ok(())
        }
        .boxed()
    }

    fn take_video_snapshot(&mut self, stub: VideoResult, ratio: AspectRatio) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.ctx.record_video_snapshot(stub, ratio) }.boxed()
    }

    fn on_video_result(&mut self, success: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let Some(camera) = &self.camera else {
                return Ok(());
            };
            debug!(success, "Taking the camera back from the recorder");
            camera.lock().map_err(camera_error)?;
            if self.ctx.state().is_at_least(CameraState::Preview) {
                camera.set_preview_callback(self.preview_callback.clone());
            }
            Ok(())
        }
        .boxed()
    }

    fn start_auto_focus(&mut self, point: PointF) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let camera = self.camera()?;
            let surface = self
                .ctx
                .preview()
                .surface_size()
                .ok_or_else(|| EngineError::Precondition("preview surface not available".to_string()))?;
            let transform = legacy_transform(&self.ctx.core().angles, surface);
            let regions = MeteringRegions::from_point(surface, point).transform(transform);
            let areas = |count: usize| -> Vec<Area> {
                regions
                    .top(count)
                    .into_iter()
                    .map(|r| Area {
                        rect: r.to_rect(),
                        weight: r.weight,
                    })
                    .collect()
            };

            let mut params = camera.parameters().map_err(camera_error)?;
            if params.max_num_focus_areas > 0 {
                params.focus_areas = areas(params.max_num_focus_areas);
            }
            if params.max_num_metering_areas > 0 {
                params.metering_areas = areas(params.max_num_metering_areas);
            }
            params.focus_mode = Some(FOCUS_MODE_AUTO.to_string());
            camera.set_parameters(&params).map_err(|e| {
                error!(error = %e, "Failed to set focus parameters");
                camera_error(e)
            })?;

            self.ctx.callback().on_focus_start(Some(point));
            self.schedule_focus_end_fallback(point);

            let ctx = Arc::downgrade(&self.ctx);
            let weak_camera = Arc::downgrade(&camera);
            let started = camera.auto_focus(Box::new(move |success| {
                if let Some(ctx) = ctx.upgrade() {
                    on_auto_focus_result(&ctx, weak_camera, success, point);
                }
            }));
            if let Err(e) = started {
                error!(error = %e, "Error calling auto focus");
            }
            Ok(())
        }
        .boxed()
    }
}

impl std::fmt::Debug for LegacyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyBackend")
            .field("camera_index", &self.camera_index)
            .field("open", &self.camera.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LegacyParameters {
        LegacyParameters {
            zoom_supported: true,
            max_zoom: 99,
            min_exposure_compensation: -12,
            max_exposure_compensation: 12,
            exposure_compensation_step: 1.0 / 6.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_exposure_is_written_in_steps() {
        let mut params = params();
        assert!(LegacyBackend::write_change(&mut params, ParameterChange::ExposureCorrection(1.0)));
        assert_eq!(params.exposure_compensation, 6);

        assert!(LegacyBackend::write_change(&mut params, ParameterChange::ExposureCorrection(-5.0)));
        assert_eq!(params.exposure_compensation, -12);
    }

    #[test]
    fn test_exposure_without_step_is_refused() {
        let mut params = LegacyParameters::default();
        assert!(!LegacyBackend::write_change(&mut params, ParameterChange::ExposureCorrection(1.0)));
    }

    #[test]
    fn test_zoom_scales_to_device_range() {
        let mut params = params();
        assert!(LegacyBackend::write_change(&mut params, ParameterChange::Zoom(0.5)));
        assert_eq!(params.zoom, 49);
    }
}
