// SPDX-License-Identifier: GPL-3.0-only

//! Session camera backend
//!
//! Drives devices that are opened asynchronously and configured with a fixed
//! set of output streams. The preview runs off one repeating request; 3A
//! metering is expressed as [`actions`] that edit that request and watch its
//! results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   SessionBackend    │  ← Implements CameraBackend trait
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    SessionShared    │  ← Repeating request, actions, pending picture
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureSession and  │  ← Output streams, requests, results
//! │    SessionDevice    │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  SessionCameraApi   │  ← Device enumeration and open
//! └─────────────────────┘
//! ```
//!
//! Results and images arrive on driver threads. Anything they trigger in the
//! engine goes through a scheduled job.

pub mod actions;
pub mod device;
pub mod mapper;
pub mod meter;
mod picture;
mod simulated;

pub use device::{CaptureSession, SessionCameraApi, SessionCharacteristics, SessionDevice, SessionError};
pub use simulated::SimulatedSessionApi;

use self::actions::{Action, ActionContext, ActionHolder, ActionId, Completion, CompletionFn, timeout};
use self::device::{
    AeMode, AfMode, CaptureListener, CaptureRequest, CaptureResult, DeviceErrorCallback, FlashMode, Image, ImageCallback,
    MeteringRectangle, StreamConfig, StreamFormat, StreamRole, Template,
};
use self::mapper::{map_facing, map_flash, map_hdr, map_white_balance, unmap_facing};
use self::meter::{meter_action, unlock_and_reset};
use self::picture::{PendingPicture, SessionPictureRecorder};
use super::types::*;
use super::CameraBackend;
use crate::constants::{jobs, timing};
use crate::engine::angles::{Axis, Reference};
use crate::engine::callback::{PictureResult, VideoResult};
use crate::engine::controls::{Facing, Flash, FrameFormat, Hdr, Mode, PictureFormat, PointF};
use crate::engine::metering::{MeteringRegions, Rect, array_transform};
use crate::engine::options::CameraOptions;
use crate::engine::params::ParameterChange;
use crate::engine::{CameraState, EngineContext};
use crate::errors::{EngineError, EngineResult, ErrorReason};
use crate::frame::FrameManager;
use crate::pipelines::PictureRecorder;
use crate::size::{AspectRatio, Size};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn camera_error(error: SessionError) -> EngineError {
    EngineError::Camera(error.into())
}

fn failed(reason: ErrorReason) -> impl Fn(SessionError) -> EngineError {
    move |error| EngineError::Camera(error.with_reason(reason))
}

fn not_open() -> EngineError {
    EngineError::Precondition("session camera is not open".to_string())
}

/// Focus mode used while nobody meters
fn default_focus(characteristics: &SessionCharacteristics, mode: Mode) -> Option<AfMode> {
    let modes = &characteristics.af_available_modes;
    if mode == Mode::Video && modes.contains(&AfMode::ContinuousVideo) {
        return Some(AfMode::ContinuousVideo);
    }
    [AfMode::ContinuousPicture, AfMode::Auto]
        .into_iter()
        .find(|m| modes.contains(m))
        .or(Some(AfMode::Off))
}

fn apply_default_focus(request: &mut CaptureRequest, characteristics: &SessionCharacteristics, mode: Mode) {
    let focus = default_focus(characteristics, mode);
    request.af_mode = focus;
    if focus == Some(AfMode::Off) {
        request.lens_focus_distance = Some(0.0);
    }
}

/// Focus mode that lets a focus trigger run
fn focus_for_metering(characteristics: &SessionCharacteristics, mode: Mode) -> Option<AfMode> {
    let modes = &characteristics.af_available_modes;
    if modes.contains(&AfMode::Auto) {
        return Some(AfMode::Auto);
    }
    if mode == Mode::Video && modes.contains(&AfMode::ContinuousVideo) {
        return Some(AfMode::ContinuousVideo);
    }
    modes.contains(&AfMode::ContinuousPicture).then_some(AfMode::ContinuousPicture)
}

/// Carry the user controls over to a request built from another template
fn copy_controls(from: &CaptureRequest, to: &mut CaptureRequest) {
    to.ae_mode = from.ae_mode;
    to.flash_mode = from.flash_mode;
    to.awb_mode = from.awb_mode;
    to.scene_mode = from.scene_mode;
    to.crop_region = from.crop_region;
    to.ae_exposure_compensation = from.ae_exposure_compensation;
    to.ae_target_fps_range = from.ae_target_fps_range;
    to.jpeg_gps_location = from.jpeg_gps_location;
}

/// Crop region for `zoom`, between 1 and `max_zoom`, centered in `array`
fn zoom_rect(array: Size, zoom: f32, max_zoom: f32) -> Rect {
    let min_width = (array.width as f32 / max_zoom) as i32;
    let min_height = (array.height as f32 / max_zoom) as i32;
    let progress = (zoom - 1.0) / (max_zoom - 1.0);
    let crop_x = ((array.width - min_width) as f32 * progress / 2.0) as i32;
    let crop_y = ((array.height - min_height) as f32 * progress / 2.0) as i32;
    Rect {
        left: crop_x,
        top: crop_y,
        right: array.width - crop_x,
        bottom: array.height - crop_y,
    }
}

#[derive(Default)]
struct Actions {
    holder: ActionHolder,
    /// The focus or picture meter currently running
    meter: Option<ActionId>,
}

#[derive(Default)]
struct SessionState {
    characteristics: Option<SessionCharacteristics>,
    device: Option<Arc<dyn SessionDevice>>,
    session: Option<Arc<dyn CaptureSession>>,
    /// The repeating request
    request: Option<CaptureRequest>,
    last_result: Option<CaptureResult>,
    actions: Actions,
    /// Streams of the configured session
    streams: Vec<StreamRole>,
    previewing: bool,
    /// An action edited the request and it was not submitted yet
    dirty: bool,
}

impl SessionState {
    /// Run `f` with the actions and the repeating request
    ///
    /// `None` when no camera is open.
    fn with_actions<R>(&mut self, f: impl FnOnce(&mut Actions, &mut ActionContext<'_>) -> R) -> Option<R> {
        let (Some(request), Some(characteristics)) = (self.request.as_mut(), self.characteristics.as_ref()) else {
            return None;
        };
        let mut ctx = ActionContext::new(request, characteristics, self.last_result.as_ref());
        let out = f(&mut self.actions, &mut ctx);
        self.dirty |= ctx.needs_apply();
        Some(out)
    }

    /// Submit the repeating request while previewing
    ///
    /// Called under the state lock so requests reach the device in order.
    fn submit(&mut self, listener: &Arc<dyn CaptureListener>) -> Result<(), SessionError> {
        self.dirty = false;
        match (&self.session, &self.request) {
            (Some(session), Some(request)) if self.previewing => {
                session.set_repeating_request(request, Arc::clone(listener))
            }
            _ => Ok(()),
        }
    }

    /// Submit the request if an action changed it
    fn flush(&mut self, listener: &Arc<dyn CaptureListener>) {
        if self.dirty
            && let Err(e) = self.submit(listener)
        {
            warn!(error = %e, "Could not apply the repeating request");
        }
    }

    fn add_preview_targets(&mut self) {
        let frames = self.streams.contains(&StreamRole::FrameProcessing);
        if let Some(request) = &mut self.request {
            request.add_target(StreamRole::Preview);
            if frames {
                request.add_target(StreamRole::FrameProcessing);
            }
        }
    }
}

fn run_all(completions: impl IntoIterator<Item = Completion>) {
    for completion in completions {
        completion.run();
    }
}

/// State shared between the backend and driver threads
struct SessionShared {
    state: Mutex<SessionState>,
    ctx: Weak<EngineContext>,
    /// Receives the results of the repeating request
    listener: Arc<dyn CaptureListener>,
    picture: Mutex<Option<PendingPicture>>,
}

struct RepeatingListener {
    shared: Weak<SessionShared>,
}

impl CaptureListener for RepeatingListener {
    fn on_capture_completed(&self, _request: &CaptureRequest, result: &CaptureResult) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_repeating_result(result);
        }
    }
}

impl SessionShared {
    fn new(ctx: &Arc<EngineContext>) -> Arc<Self> {
        let ctx = Arc::downgrade(ctx);
        Arc::new_cyclic(|weak: &Weak<SessionShared>| SessionShared {
            state: Mutex::new(SessionState::default()),
            ctx,
            listener: Arc::new(RepeatingListener { shared: weak.clone() }),
            picture: Mutex::new(None),
        })
    }

    fn mode(&self) -> Mode {
        self.ctx.upgrade().map(|ctx| ctx.core().params.mode).unwrap_or_default()
    }

    fn device(&self) -> EngineResult<Arc<dyn SessionDevice>> {
        lock(&self.state).device.clone().ok_or_else(not_open)
    }

    fn is_previewing(&self) -> bool {
        lock(&self.state).previewing
    }

    fn on_repeating_result(&self, result: &CaptureResult) {
        let completions = {
            let mut state = lock(&self.state);
            if !state.previewing {
                return;
            }
            state.last_result = Some(result.clone());
            let completions = state
                .with_actions(|actions, ctx| {
                    let completions = actions.holder.on_capture_completed(ctx, result);
                    if actions.meter.is_some_and(|id| !actions.holder.contains(id)) {
                        actions.meter = None;
                    }
                    completions
                })
                .unwrap_or_default();
            state.flush(&self.listener);
            completions
        };
        run_all(completions);
    }

    /// Start a metering action, aborting the one still running
    ///
    /// `on_complete` runs on whichever thread finishes the action, false
    /// when it was cut short.
    fn start_meter(&self, action: Box<dyn Action>, on_complete: CompletionFn) {
        let mode = self.mode();
        let mut on_complete = Some(on_complete);
        let completions = {
            let mut state = lock(&self.state);
            let completions = state.with_actions(|actions, ctx| {
                let mut completions = Vec::new();
                if let Some(previous) = actions.meter.take() {
                    completions.extend(actions.holder.abort(previous, ctx));
                }
                if let Some(focus) = focus_for_metering(ctx.characteristics, mode) {
                    ctx.request.af_mode = Some(focus);
                    ctx.apply();
                }
                let (id, finished) = actions.holder.start(action, ctx, on_complete.take());
                match finished {
                    Some(completion) => completions.push(completion),
                    None => actions.meter = Some(id),
                }
                completions
            });
            state.flush(&self.listener);
            completions.unwrap_or_default()
        };
        run_all(completions);
        if let Some(on_complete) = on_complete {
            debug!("No camera to meter with");
            on_complete(false);
        }
    }

    /// Unlock 3A and return to whole-frame metering
    fn unlock_and_reset(&self) {
        let mode = self.mode();
        let completions = {
            let mut state = lock(&self.state);
            let focus = state.characteristics.as_ref().and_then(|c| default_focus(c, mode));
            let completions = state.with_actions(|actions, ctx| {
                let (_, finished) = actions.holder.start(unlock_and_reset(focus), ctx, None);
                finished
            });
            state.flush(&self.listener);
            completions.flatten()
        };
        debug!("Metering reset");
        run_all(completions);
    }

    /// Rebuild the repeating request from `template`, keeping user controls
    fn switch_template(&self, template: Template, extra: &[StreamRole], mode: Mode) -> EngineResult<()> {
        let mut state = lock(&self.state);
        let device = state.device.clone().ok_or_else(not_open)?;
        let characteristics = state.characteristics.as_ref().ok_or_else(not_open)?;
        let mut request = device.create_request(template).map_err(camera_error)?;
        if let Some(previous) = &state.request {
            copy_controls(previous, &mut request);
        }
        apply_default_focus(&mut request, characteristics, mode);
        for role in extra {
            request.add_target(*role);
        }
        debug!(template = ?template, "Switching repeating request template");
        state.request = Some(request);
        if state.previewing {
            state.add_preview_targets();
        }
        state.submit(&self.listener).map_err(camera_error)
    }
}

/// Session device backend implementation
pub struct SessionBackend {
    api: Arc<dyn SessionCameraApi>,
    ctx: Arc<EngineContext>,
    shared: Arc<SessionShared>,
    /// Camera picked by `collect_camera_info`
    camera_id: Option<String>,
    frames: Option<FrameManager>,
    /// Video waiting for a session with an encoder stream
    pending_video: Option<VideoResult>,
}

impl SessionBackend {
    pub fn new(api: Arc<dyn SessionCameraApi>, ctx: Arc<EngineContext>) -> Self {
        let shared = SessionShared::new(&ctx);
        Self {
            api,
            ctx,
            shared,
            camera_id: None,
            frames: None,
            pending_video: None,
        }
    }

    /// Report device errors to the engine
    fn error_callback(&self) -> DeviceErrorCallback {
        let ctx = Arc::downgrade(&self.ctx);
        Arc::new(move |e: SessionError| {
            if let Some(ctx) = ctx.upgrade() {
                error!(error = %e, "Session camera error");
                ctx.dispatch_error("session camera error", camera_error(e));
            }
        })
    }

    fn picture_callback(&self) -> ImageCallback {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |image: Image| {
            if let Some(shared) = shared.upgrade() {
                shared.on_picture_image(image);
            }
        })
    }

    fn frame_callback(&self, frames: FrameManager) -> ImageCallback {
        let ctx = Arc::downgrade(&self.ctx);
        Arc::new(move |image: Image| {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            // Frames of a session being torn down are dropped
            if !ctx.state().is_at_least(CameraState::Preview) || ctx.orchestrator().has_pending_state_change() {
                return;
            }
            if let Some(frame) = frames.get_frame(image.data, image.timestamp_ms) {
                ctx.callback().on_frame(frame);
            }
        })
    }

    fn all_characteristics(&self) -> Vec<SessionCharacteristics> {
        match self.api.camera_ids() {
            Ok(ids) => ids.iter().filter_map(|id| self.api.characteristics(id).ok()).collect(),
            Err(e) => {
                warn!(error = %e, "Could not list cameras");
                Vec::new()
            }
        }
    }

    /// Switch to the record template and hand the encoder stream to a recorder
    fn start_full_video(&mut self, stub: VideoResult) -> EngineResult<()> {
        let mode = self.ctx.core().params.mode;
        let started = self
            .shared
            .switch_template(Template::Record, &[StreamRole::Recorder], mode)
            .and_then(|_| self.ctx.full_video_source());
        match started {
            Ok(source) => {
                info!(size = %source.size, rate = source.frame_rate, "Starting full video");
                let recorder = self.ctx.recorders().full_video(source);
                self.ctx.start_video_recorder(recorder, stub);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not start the video");
                self.ctx
                    .recorder_listener()
                    .on_video_result(Err(EngineError::camera(ErrorReason::VideoFailed, e.to_string())));
                Err(e)
            }
        }
    }
}

/// Called on a driver thread when the focus meter completes
fn on_auto_focus_result(ctx: &Arc<EngineContext>, shared: Weak<SessionShared>, success: bool, point: PointF) {
    let weak = Arc::downgrade(ctx);
    let _ = ctx
        .orchestrator()
        .schedule("auto focus result", true, move || async move {
            let Some(ctx) = weak.upgrade() else {
                return Ok(());
            };
            debug!(success, "Metering finished");
            ctx.callback().on_focus_end(success, Some(point));
            let orchestrator = ctx.orchestrator();
            orchestrator.remove(jobs::RESET_METERING);
            let delay = ctx.core().settings.auto_focus_reset_delay();
            if !delay.is_zero() {
                let _ = orchestrator.schedule_stateful_delayed(
                    jobs::RESET_METERING,
                    CameraState::Preview,
                    delay,
                    move || async move {
                        if let Some(shared) = shared.upgrade() {
                            shared.unlock_and_reset();
                        }
                        Ok(())
                    },
                );
            }
            Ok(())
        });
}

impl CameraBackend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            picture_formats: vec![PictureFormat::Jpeg, PictureFormat::Dng],
            preview_restart: RestartScope::Bind,
            rebind_for_frame_processing: true,
        }
    }

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        let ids = match self.api.camera_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list cameras");
                return Vec::new();
            }
        };
        let devices: Vec<CameraDevice> = ids
            .into_iter()
            .filter_map(|id| {
                let characteristics = self.api.characteristics(&id).ok()?;
                Some(CameraDevice {
                    facing: unmap_facing(characteristics.lens_facing)?,
                    name: characteristics.name,
                    sensor_orientation: characteristics.sensor_orientation,
                    id,
                })
            })
            .collect();
        debug!(count = devices.len(), "Enumerated session cameras");
        devices
    }

    fn collect_camera_info(&mut self, facing: Facing) -> bool {
        let internal = map_facing(facing);
        let ids = match self.api.camera_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list cameras");
                return false;
            }
        };
        info!(facing = %facing, internal, count = ids.len(), "Collecting camera info");
        for id in ids {
            let Ok(characteristics) = self.api.characteristics(&id) else {
                continue;
            };
            if characteristics.lens_facing == internal {
                self.ctx
                    .core()
                    .angles
                    .set_sensor_offset(facing, characteristics.sensor_orientation);
                self.camera_id = Some(id);
                return true;
            }
        }
        false
    }

    fn on_start_engine(&mut self) -> BoxFuture<'_, EngineResult<CameraOptions>> {
        async move {
            let id = self
                .camera_id
                .clone()
                .ok_or_else(|| EngineError::Precondition("no camera selected".to_string()))?;
            let (tx, rx) = oneshot::channel();
            self.api
                .open(
                    &id,
                    Box::new(move |result| {
                        let _ = tx.send(result);
                    }),
                    self.error_callback(),
                )
                .map_err(failed(ErrorReason::FailedToConnect))?;
            let device = rx
                .await
                .map_err(|_| EngineError::camera(ErrorReason::FailedToConnect, "open was never answered"))?
                .map_err(|e| {
                    error!(error = %e, "Failed to connect, maybe in use by another client");
                    failed(ErrorReason::FailedToConnect)(e)
                })?;
            // Stored before anything else can fail so stop_engine releases it
            lock(&self.shared.state).device = Some(Arc::clone(&device));

            let characteristics = self
                .api
                .characteristics(&id)
                .map_err(failed(ErrorReason::FailedToConnect))?;
            let (flip, mode, picture_format) = {
                let core = self.ctx.core();
                (
                    core.angles.flip(Reference::Sensor, Reference::View),
                    core.params.mode,
                    core.params.picture_format,
                )
            };
            let options = mapper::build_options(&characteristics, &self.all_characteristics(), flip, picture_format)?;

            let mut request = device
                .create_request(Template::Preview)
                .map_err(failed(ErrorReason::FailedToConnect))?;
            apply_default_focus(&mut request, &characteristics, mode);
            {
                let mut state = lock(&self.shared.state);
                state.request = Some(request);
                state.characteristics = Some(characteristics);
            }
            info!(id = %id, "Session camera opened");
            Ok(options)
        }
        .boxed()
    }

    fn on_start_bind(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let device = self.shared.device()?;
            let surface = self
                .ctx
                .preview()
                .surface_id()
                .ok_or_else(|| EngineError::Precondition("preview surface not available".to_string()))?;
            let available = self.preview_stream_available_sizes();
            let (capture, stream) = self.ctx.compute_bind_sizes(&available)?;
            let (mode, picture_format, has_processors, frame_format, pool_size) = {
                let core = self.ctx.core();
                (
                    core.params.mode,
                    core.params.picture_format,
                    core.params.has_frame_processors,
                    core.params.frame_processing_format.unwrap_or(FrameFormat::Yuv420),
                    core.settings.frame_processing_pool_size,
                )
            };

            let mut outputs = vec![StreamConfig {
                role: StreamRole::Preview,
                format: StreamFormat::Surface(surface),
                size: stream,
                capacity: 1,
                on_image: None,
            }];
            match mode {
                Mode::Picture => outputs.push(StreamConfig {
                    role: StreamRole::Picture,
                    format: StreamFormat::Picture(picture_format),
                    size: capture,
                    capacity: 2,
                    on_image: Some(self.picture_callback()),
                }),
                Mode::Video if self.pending_video.is_some() => outputs.push(StreamConfig {
                    role: StreamRole::Recorder,
                    format: StreamFormat::Encoder,
                    size: capture,
                    capacity: 1,
                    on_image: None,
                }),
                Mode::Video => {}
            }
            if has_processors {
                let size = self
                    .ctx
                    .compute_frame_processing_size(&self.frame_processing_available_sizes())?;
                let frames = FrameManager::new(pool_size, None);
                outputs.push(StreamConfig {
                    role: StreamRole::FrameProcessing,
                    format: StreamFormat::Frames(frame_format),
                    size,
                    capacity: pool_size + 1,
                    on_image: Some(self.frame_callback(frames.clone())),
                });
                self.frames = Some(frames);
            }

            let streams: Vec<StreamRole> = outputs.iter().map(|o| o.role).collect();
            let (tx, rx) = oneshot::channel();
            device
                .create_session(
                    outputs,
                    Box::new(move |result| {
                        let _ = tx.send(result);
                    }),
                )
                .map_err(failed(ErrorReason::FailedToStartPreview))?;
            let session = rx
                .await
                .map_err(|_| EngineError::camera(ErrorReason::FailedToStartPreview, "session was never configured"))?
                .map_err(|e| {
                    error!(error = %e, "Failed to configure the capture session");
                    failed(ErrorReason::FailedToStartPreview)(e)
                })?;
            {
                let mut state = lock(&self.shared.state);
                state.session = Some(session);
                state.streams = streams;
            }
            info!(preview = %stream, capture = %capture, "Capture session configured");
            Ok(())
        }
        .boxed()
    }

    fn on_start_preview(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            self.ctx.callback().on_preview_stream_size_changed();
            let (rotation, angles, frame_size, frame_format) = {
                let core = self.ctx.core();
                (
                    core.angles.offset(Reference::Base, Reference::View, Axis::Absolute),
                    core.angles.clone(),
                    core.frame_processing_size,
                    core.params.frame_processing_format.unwrap_or(FrameFormat::Yuv420),
                )
            };
            self.ctx.preview().set_draw_rotation(rotation);
            if let (Some(frames), Some(size)) = (&self.frames, frame_size) {
                frames.set_up(frame_format, size, &angles);
            }

            {
                let mut state = lock(&self.shared.state);
                if state.request.is_none() {
                    return Err(not_open());
                }
                state.add_preview_targets();
                state.previewing = true;
                if let Err(e) = state.submit(&self.shared.listener) {
                    state.previewing = false;
                    error!(error = %e, "Could not start the repeating request");
                    return Err(failed(ErrorReason::FailedToStartPreview)(e));
                }
            }
            info!("Session preview started");

            if let Some(stub) = self.pending_video.take() {
                self.ctx.core().video_pending = false;
                self.start_full_video(stub)?;
            }
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
            lock(&self.shared.picture).take();
            if let Some(frames) = &self.frames {
                frames.release();
            }
            let session = {
                let mut state = lock(&self.shared.state);
                state.previewing = false;
                state.last_result = None;
                if let Some(request) = &mut state.request {
                    request.remove_target(StreamRole::Preview);
                    request.remove_target(StreamRole::FrameProcessing);
                }
                state.session.clone()
            };
            if let Some(session) = session
                && let Err(e) = session.stop_repeating()
            {
                debug!(error = %e, "Could not stop the repeating request");
            }
            Ok(())
        }
        .boxed()
    }

    fn on_stop_bind(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            self.frames = None;
            let session = {
                let mut state = lock(&self.shared.state);
                state.streams.clear();
                if let Some(request) = &mut state.request {
                    request.targets.clear();
                }
                state.session.take()
            };
            if let Some(session) = session {
                session.close();
                debug!("Capture session closed");
            }
            Ok(())
        }
        .boxed()
    }

    fn on_stop_engine(&mut self) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let orchestrator = self.ctx.orchestrator();
            orchestrator.remove(jobs::RESET_METERING);
            orchestrator.remove(jobs::FOCUS_END);
            self.frames = None;
            let (device, completions) = {
                let mut state = lock(&self.shared.state);
                let completions = state
                    .with_actions(|actions, ctx| {
                        actions.meter = None;
                        actions.holder.abort_all(ctx)
                    })
                    .unwrap_or_default();
                let device = state.device.take();
                *state = SessionState::default();
                (device, completions)
            };
            run_all(completions);
            lock(&self.shared.picture).take();
            if self.pending_video.take().is_some() {
                self.ctx.core().video_pending = false;
                self.ctx.recorder_listener().on_video_result(Err(EngineError::camera(
                    ErrorReason::VideoFailed,
                    "camera closed before the video started".to_string(),
                )));
            }

            if let Some(device) = device {
                info!("Releasing session camera");
                // Close blocks until the device is free
                if let Err(e) = tokio::task::spawn_blocking(move || device.close()).await {
                    warn!(error = %e, "Exception while releasing camera");
                }
                info!("Released session camera");
            }
            Ok(())
        }
        .boxed()
    }

    fn preview_stream_available_sizes(&self) -> Vec<Size> {
        let state = lock(&self.shared.state);
        let Some(characteristics) = &state.characteristics else {
            return Vec::new();
        };
        let mut sizes: Vec<Size> = Vec::with_capacity(characteristics.preview_sizes.len());
        for size in &characteristics.preview_sizes {
            if !sizes.contains(size) {
                sizes.push(*size);
            }
        }
        sizes
    }

    fn frame_processing_available_sizes(&self) -> Vec<Size> {
        lock(&self.shared.state)
            .characteristics
            .as_ref()
            .map(|c| c.frame_sizes.clone())
            .unwrap_or_default()
    }

    fn apply_parameter(&mut self, change: ParameterChange) -> BoxFuture<'_, EngineResult<bool>> {
        async move {
            if let ParameterChange::PlaySounds(play) = change {
                // The shutter sound is up to the application
                debug!(play, "Play sounds stored");
                return Ok(true);
            }
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let characteristics = state.characteristics.as_ref().ok_or_else(not_open)?;
            let request = state.request.as_mut().ok_or_else(not_open)?;
            match change {
                ParameterChange::Flash(flash) => {
                    let available = |flash: Flash| {
                        map_flash(flash)
                            .iter()
                            .copied()
                            .find(|(ae, _)| characteristics.ae_available_modes.contains(ae))
                    };
                    let Some((ae_mode, flash_mode)) = available(flash) else {
                        return Ok(false);
                    };
                    // Leaving torch only works after one request with the flash off
                    if state.previewing
                        && let Some(session) = &state.session
                    {
                        let (off_ae, off_flash) = available(Flash::Off).unwrap_or((AeMode::On, FlashMode::Off));
                        request.ae_mode = Some(off_ae);
                        request.flash_mode = Some(off_flash);
                        if let Err(e) = session.capture(request, None) {
                            warn!(error = %e, "Could not submit the flash reset request");
                        }
                    }
                    request.ae_mode = Some(ae_mode);
                    request.flash_mode = Some(flash_mode);
                }
                ParameterChange::WhiteBalance(white_balance) => {
                    let mode = map_white_balance(white_balance);
                    if !characteristics.awb_available_modes.contains(&mode) {
                        return Ok(false);
                    }
                    request.awb_mode = Some(mode);
                }
                ParameterChange::Hdr(hdr) => {
                    let mode = map_hdr(hdr);
                    if hdr == Hdr::On && !characteristics.scene_modes.contains(&mode) {
                        return Ok(false);
                    }
                    request.scene_mode = Some(mode);
                }
                ParameterChange::Zoom(zoom) => {
                    let max_zoom = characteristics.max_digital_zoom;
                    if max_zoom <= 1.0 {
                        return Ok(false);
                    }
                    let real_zoom = zoom * (max_zoom - 1.0) + 1.0;
                    request.crop_region = Some(zoom_rect(characteristics.active_array, real_zoom, max_zoom));
                }
                ParameterChange::ExposureCorrection(ev) => {
                    let step = characteristics.ae_compensation_step;
                    if step <= 0.0 {
                        return Ok(false);
                    }
                    let (lower, upper) = characteristics.ae_compensation_range;
                    request.ae_exposure_compensation = ((ev / step).round() as i32).clamp(lower, upper);
                }
                ParameterChange::PreviewFrameRate { range, .. } => request.ae_target_fps_range = Some(range),
                ParameterChange::Location(location) => request.jpeg_gps_location = location,
                ParameterChange::PlaySounds(_) => {}
            }
            match state.submit(&self.shared.listener) {
                Ok(()) => {}
                Err(SessionError::Runtime(message)) => {
                    warn!(error = %message, "Parameter stored but not applied");
                }
                Err(e) => return Err(camera_error(e)),
            }
            debug!(change = ?change, "Session parameter applied");
            Ok(true)
        }
        .boxed()
    }

    fn take_picture(&mut self, mut stub: PictureResult, do_metering: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            {
                let core = self.ctx.core();
                stub.rotation = core.angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor);
                stub.size = core
                    .picture_size(Reference::Output)
                    .ok_or_else(|| EngineError::Precondition("picture size not computed".to_string()))?;
            }
            let metering = do_metering && self.shared.is_previewing();
            debug!(size = %stub.size, rotation = stub.rotation, metering, "Taking session picture");
            let mut recorder = SessionPictureRecorder::new(&self.shared, metering);
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
        do_metering: bool,
    ) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            if !(do_metering && self.shared.is_previewing()) {
                return self.ctx.record_picture_snapshot(stub, ratio);
            }
            debug!("Metering before the snapshot");
            self.ctx.core().picture_pending = true;
            let ctx = Arc::downgrade(&self.ctx);
            let shared = Arc::downgrade(&self.shared);
            let action = timeout(timing::METER_TIMEOUT_SHORT, meter_action(Vec::new()));
            self.shared.start_meter(
                action,
                Box::new(move |success| {
                    let Some(ctx) = ctx.upgrade() else {
                        return;
                    };
                    debug!(success, "Metering before snapshot finished");
                    let weak = Arc::downgrade(&ctx);
                    let _ = ctx
                        .orchestrator()
                        .schedule("picture snapshot after metering", true, move || async move {
                            let Some(ctx) = weak.upgrade() else {
                                return Ok(());
                            };
                            ctx.core().picture_pending = false;
                            let taken = if ctx.state() < CameraState::Bind {
                                Err(EngineError::camera(
                                    ErrorReason::PictureFailed,
                                    "camera closed while metering",
                                ))
                            } else {
                                ctx.record_picture_snapshot(stub, ratio)
                            };
                            if let Err(e) = taken {
                                warn!(error = %e, "Could not take the snapshot");
                                ctx.recorder_listener().on_picture_result(Err(e));
                            }
                            picture::schedule_metering_reset(&ctx, shared);
                            Ok(())
                        });
                }),
            );
            Ok(())
        }
        .boxed()
    }

    fn take_video(&mut self, stub: VideoResult) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            // The encoder stream must be part of the session
            info!(file = %stub.file.display(), "Rebinding with an encoder stream");
            self.pending_video = Some(stub);
            self.ctx.core().video_pending = true;
            let _ = self.ctx.request_restart_bind();
            Ok(())
        }
        .boxed()
    }

    fn take_video_snapshot(&mut self, stub: VideoResult, ratio: AspectRatio) -> BoxFuture<'_, EngineResult<()>> {
        async move { self.ctx.record_video_snapshot(stub, ratio) }.boxed()
    }

    fn on_video_result(&mut self, success: bool) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let recording_template = lock(&self.shared.state)
                .request
                .as_ref()
                .is_some_and(|r| r.template != Template::Preview);
            if !recording_template {
                return Ok(());
            }
            debug!(success, "Restoring the preview template");
            let mode = self.ctx.core().params.mode;
            self.shared.switch_template(Template::Preview, &[], mode)
        }
        .boxed()
    }

    fn start_auto_focus(&mut self, point: PointF) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let (array, max_regions) = {
                let state = lock(&self.shared.state);
                let Some(characteristics) = state.characteristics.as_ref().filter(|_| state.previewing) else {
                    debug!("Not previewing, skipping auto focus");
                    return Ok(());
                };
                let max_regions = characteristics
                    .max_regions_af
                    .max(characteristics.max_regions_ae)
                    .max(characteristics.max_regions_awb);
                (characteristics.active_array, max_regions)
            };
            let surface = self
                .ctx
                .preview()
                .surface_size()
                .ok_or_else(|| EngineError::Precondition("preview surface not available".to_string()))?;
            let transform = array_transform(&self.ctx.core().angles, surface, array);
            let areas: Vec<MeteringRectangle> = MeteringRegions::from_point(surface, point)
                .transform(transform)
                .top(max_regions)
                .into_iter()
                .map(|r| MeteringRectangle {
                    rect: r.to_rect(),
                    weight: r.weight,
                })
                .collect();

            self.ctx.callback().on_focus_start(Some(point));
            let ctx = Arc::downgrade(&self.ctx);
            let shared = Arc::downgrade(&self.shared);
            self.shared.start_meter(
                timeout(timing::METER_TIMEOUT, meter_action(areas)),
                Box::new(move |success| {
                    if let Some(ctx) = ctx.upgrade() {
                        on_auto_focus_result(&ctx, shared, success, point);
                    }
                }),
            );
            Ok(())
        }
        .boxed()
    }
}

impl std::fmt::Debug for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("SessionBackend")
            .field("camera_id", &self.camera_id)
            .field("open", &state.device.is_some())
            .field("previewing", &state.previewing)
            .field("actions", &state.actions.holder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::simulated::{back_characteristics, front_characteristics};

    #[test]
    fn test_zoom_rect_spans_array_to_center() {
        let array = Size::new(4000, 3200);
        let full = zoom_rect(array, 1.0, 8.0);
        assert_eq!(
            full,
            Rect {
                left: 0,
                top: 0,
                right: 4000,
                bottom: 3200
            }
        );
        let max = zoom_rect(array, 8.0, 8.0);
        assert_eq!(max.width(), 500);
        assert_eq!(max.height(), 400);
        assert_eq!(max.left, 1750);
    }

    #[test]
    fn test_default_focus_prefers_continuous_modes() {
        let back = back_characteristics();
        assert_eq!(default_focus(&back, Mode::Picture), Some(AfMode::ContinuousPicture));
        assert_eq!(default_focus(&back, Mode::Video), Some(AfMode::ContinuousVideo));
        assert_eq!(focus_for_metering(&back, Mode::Video), Some(AfMode::Auto));

        let front = front_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        apply_default_focus(&mut request, &front, Mode::Picture);
        assert_eq!(request.af_mode, Some(AfMode::Off));
        assert_eq!(request.lens_focus_distance, Some(0.0));
        assert_eq!(focus_for_metering(&front, Mode::Picture), None);
    }

    #[test]
    fn test_copy_controls_skips_triggers_and_locks() {
        let mut from = CaptureRequest::new(Template::Preview);
        from.ae_mode = Some(AeMode::OnAlwaysFlash);
        from.ae_exposure_compensation = 3;
        from.ae_lock = true;
        from.af_trigger = Some(device::Trigger::Start);
        let mut to = CaptureRequest::new(Template::Record);
        copy_controls(&from, &mut to);
        assert_eq!(to.ae_mode, Some(AeMode::OnAlwaysFlash));
        assert_eq!(to.ae_exposure_compensation, 3);
        assert!(!to.ae_lock);
        assert_eq!(to.af_trigger, None);
        assert_eq!(to.template, Template::Record);
    }
}
