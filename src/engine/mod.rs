// SPDX-License-Identifier: GPL-3.0-only

//! Camera engine
//!
//! [`CameraEngine`] owns one camera device and walks it through the
//! `OFF -> ENGINE -> BIND -> PREVIEW` lifecycle. Every operation becomes a
//! named job on the [`Orchestrator`], so nothing that touches the device runs
//! concurrently. The hardware specifics live behind
//! [`CameraBackend`](crate::backends::camera::CameraBackend).
//!
//! Tasks returned by the engine must not be awaited from inside a job; the
//! job would wait on itself.

pub mod angles;
pub mod callback;
pub mod controls;
pub mod core;
pub mod metering;
pub mod options;
pub mod orchestrator;
pub mod params;
pub mod state;
pub mod task;

pub use angles::{Angles, Axis, Reference};
pub use callback::{ChannelCallback, EngineCallback, EngineEvent, NoopCallback, PictureResult, VideoResult};
pub use options::CameraOptions;
pub use orchestrator::{ErrorHandler, Orchestrator};
pub use state::CameraState;
pub use task::Task;

use self::controls::{Audio, Facing, Flash, FrameFormat, Hdr, Location, Mode, PictureFormat, PointF, WhiteBalance};
use self::core::EngineCore;
use self::params::{Parameter, ParameterSet};
use crate::backends::camera::{
    BackendCapabilities, BackendKind, CameraBackend, CameraDevice, CameraHardware, RestartScope,
    get_backend_for_hardware,
};
use crate::config::{EngineConfig, VideoSettings};
use crate::constants::jobs;
use crate::errors::{CameraError, EngineError, EngineResult, ErrorReason};
use crate::pipelines::{
    DefaultRecorderFactory, RecorderFactory, RecorderListener, SnapshotRequest, VideoRecorder, VideoSource,
};
use crate::preview::{PreviewSurface, SimulatedPreview};
use crate::size::{AspectRatio, Size, SizeSelector};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Frame rate used by recorders when the preview rate is automatic
const DEFAULT_VIDEO_FRAME_RATE: i32 = 30;

/// Everything a backend needs from the engine
///
/// Backends keep an `Arc` of this. Jobs they schedule capture what they
/// need from it; the engine core is locked only for short, synchronous
/// sections.
pub struct EngineContext {
    orchestrator: Orchestrator,
    core: Mutex<EngineCore>,
    callback: Arc<dyn EngineCallback>,
    preview: Arc<dyn PreviewSurface>,
    recorders: Arc<dyn RecorderFactory>,
    listener: Arc<dyn RecorderListener>,
    error_handler: ErrorHandler,
    runtime: Handle,
    engine: Weak<EngineShared>,
}

impl EngineContext {
    pub fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn callback(&self) -> &Arc<dyn EngineCallback> {
        &self.callback
    }

    pub fn preview(&self) -> &Arc<dyn PreviewSurface> {
        &self.preview
    }

    pub fn recorders(&self) -> &Arc<dyn RecorderFactory> {
        &self.recorders
    }

    /// Listener to hand to recorders
    pub fn recorder_listener(&self) -> Arc<dyn RecorderListener> {
        Arc::clone(&self.listener)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn state(&self) -> CameraState {
        self.orchestrator.current_state()
    }

    pub fn target_state(&self) -> CameraState {
        self.orchestrator.target_state()
    }

    /// Report a failure that happened outside of any job
    pub fn dispatch_error(&self, source: &str, error: EngineError) {
        (self.error_handler)(source, error);
    }

    /// Compute the capture and preview stream sizes for binding
    ///
    /// Both are stored in the core in the `Sensor` reference. The preview is
    /// told the stream size as it will appear on screen.
    pub fn compute_bind_sizes(&self, preview_sizes: &[Size]) -> EngineResult<(Size, Size)> {
        let surface = self.preview.surface_size();
        let (capture, stream, stream_for_view) = {
            let mut core = self.core();
            let mode = core.params.mode;
            let capture = core.compute_capture_size(mode)?;
            core.capture_size = Some(capture);
            let stream = core.compute_preview_stream_size(preview_sizes, surface)?;
            core.preview_stream_size = Some(stream);
            (capture, stream, core.preview_stream_size_in(Reference::View))
        };
        if let Some(size) = stream_for_view {
            self.preview.set_stream_size(size);
        }
        info!(capture = %capture, preview = %stream, "Computed bind sizes");
        Ok((capture, stream))
    }

    /// Compute and store the frame processing size
    pub fn compute_frame_processing_size(&self, frame_sizes: &[Size]) -> EngineResult<Size> {
        let mut core = self.core();
        let size = core.compute_frame_processing_size(frame_sizes)?;
        core.frame_processing_size = Some(size);
        Ok(size)
    }

    /// Source description for a full video recording
    pub fn full_video_source(&self) -> EngineResult<VideoSource> {
        let core = self.core();
        let size = core
            .video_size(Reference::Output)
            .ok_or_else(|| EngineError::Precondition("video size not computed".to_string()))?;
        Ok(VideoSource {
            size,
            rotation: core.angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor),
            frame_rate: video_frame_rate(&core),
        })
    }

    /// Take a snapshot of the preview through the recorder factory
    pub fn record_picture_snapshot(&self, stub: PictureResult, ratio: AspectRatio) -> EngineResult<()> {
        let request = {
            let core = self.core();
            let uncropped = core
                .uncropped_snapshot_size(Reference::Output)
                .ok_or_else(|| EngineError::Precondition("preview stream size not computed".to_string()))?;
            SnapshotRequest {
                uncropped,
                ratio,
                rotation: core.angles.offset(Reference::View, Reference::Output, Axis::Absolute),
            }
        };
        debug!(size = %request.uncropped, ratio = %ratio, "Taking picture snapshot");
        let mut recorder = self.recorders.picture_snapshot(request);
        recorder.take(stub, self.recorder_listener());
        self.core().picture_recorder = Some(recorder);
        Ok(())
    }

    /// Record the preview stream through the recorder factory
    pub fn record_video_snapshot(&self, stub: VideoResult, ratio: AspectRatio) -> EngineResult<()> {
        if !self.preview.supports_snapshots() {
            return Err(EngineError::Precondition(
                "video snapshots are not supported by this preview".to_string(),
            ));
        }
        let source = {
            let core = self.core();
            let size = core
                .uncropped_snapshot_size(Reference::Output)
                .ok_or_else(|| EngineError::Precondition("preview stream size not computed".to_string()))?;
            VideoSource {
                size,
                rotation: core.angles.offset(Reference::View, Reference::Output, Axis::Absolute),
                frame_rate: video_frame_rate(&core),
            }
        };
        let recorder = self.recorders.snapshot_video(source, ratio);
        self.start_video_recorder(recorder, stub);
        Ok(())
    }

    /// Start `recorder` and keep it as the outstanding video
    pub fn start_video_recorder(&self, mut recorder: Box<dyn VideoRecorder>, stub: VideoResult) {
        recorder.start(stub, self.recorder_listener());
        self.core().video_recorder = Some(recorder);
    }

    /// Whether frames should be produced for processors
    pub fn has_frame_processors(&self) -> bool {
        self.core().params.has_frame_processors
    }

    /// Schedule a bind restart, as if requested by the application
    pub fn request_restart_bind(&self) -> Task {
        match self.engine.upgrade() {
            Some(shared) => CameraEngine { shared }.restart_bind(),
            None => Task::ready(Err(EngineError::Cancelled)),
        }
    }
}

fn video_frame_rate(core: &EngineCore) -> i32 {
    let rate = core.params.preview_frame_rate.round() as i32;
    if rate > 0 { rate } else { DEFAULT_VIDEO_FRAME_RATE }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("orchestrator", &self.orchestrator)
            .field("core", &*self.core())
            .finish()
    }
}

struct EngineShared {
    ctx: Arc<EngineContext>,
    backend: tokio::sync::Mutex<Box<dyn CameraBackend>>,
    kind: BackendKind,
    capabilities: BackendCapabilities,
    /// Set by an unrecoverable destroy until the next start
    suppress_errors: AtomicBool,
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        // Pending jobs may hold the context; cancelling them breaks the cycle
        self.ctx.orchestrator.reset();
    }
}

/// Parameters whose changes are reported back through the callback
#[derive(Debug, Clone)]
enum ChangeNotice {
    Zoom(Option<Vec<PointF>>),
    ExposureCorrection([f32; 2], Option<Vec<PointF>>),
}

#[derive(Debug, Clone, Copy)]
enum FrameProcessingUpdate {
    Processors(bool),
    Format(FrameFormat),
}

impl FrameProcessingUpdate {
    fn job_name(&self) -> String {
        match self {
            FrameProcessingUpdate::Processors(v) => format!("has frame processors ({})", v),
            FrameProcessingUpdate::Format(v) => format!("frame processing format ({})", v),
        }
    }

    /// Store the update; false when nothing changed
    fn apply(&self, params: &mut ParameterSet) -> bool {
        match *self {
            FrameProcessingUpdate::Processors(v) => {
                std::mem::replace(&mut params.has_frame_processors, v) != v
            }
            FrameProcessingUpdate::Format(v) => params.frame_processing_format.replace(v) != Some(v),
        }
    }
}

/// Builder for [`CameraEngine`]
pub struct EngineBuilder {
    hardware: CameraHardware,
    config: EngineConfig,
    callback: Arc<dyn EngineCallback>,
    preview: Arc<dyn PreviewSurface>,
    recorders: Arc<dyn RecorderFactory>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callback(mut self, callback: Arc<dyn EngineCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn preview(mut self, preview: Arc<dyn PreviewSurface>) -> Self {
        self.preview = preview;
        self
    }

    pub fn recorders(mut self, recorders: Arc<dyn RecorderFactory>) -> Self {
        self.recorders = recorders;
        self
    }

    /// Runtime for the orchestrator worker; the current one by default
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> EngineResult<CameraEngine> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| EngineError::Config(format!("no tokio runtime available: {}", e)))?,
        };
        let Self {
            hardware,
            config,
            callback,
            preview,
            recorders,
            ..
        } = self;
        let kind = hardware.kind();

        let shared = Arc::new_cyclic(|weak: &Weak<EngineShared>| {
            let error_handler = engine_error_handler(weak.clone());
            let orchestrator = Orchestrator::new(runtime.clone());
            orchestrator.set_error_handler(Arc::clone(&error_handler));
            let ctx = Arc::new(EngineContext {
                orchestrator,
                core: Mutex::new(EngineCore::new(config)),
                callback,
                preview,
                recorders,
                listener: Arc::new(RecorderEvents { engine: weak.clone() }),
                error_handler,
                runtime,
                engine: weak.clone(),
            });
            let backend = get_backend_for_hardware(hardware, Arc::clone(&ctx));
            let capabilities = backend.capabilities();
            EngineShared {
                ctx,
                backend: tokio::sync::Mutex::new(backend),
                kind,
                capabilities,
                suppress_errors: AtomicBool::new(false),
            }
        });
        info!(backend = %kind, "Camera engine created");
        Ok(CameraEngine { shared })
    }
}

fn engine_error_handler(weak: Weak<EngineShared>) -> ErrorHandler {
    Arc::new(move |job: &str, error: EngineError| {
        if let Some(shared) = weak.upgrade() {
            CameraEngine { shared }.handle_error(job, error);
        }
    })
}

/// Handle to a camera engine; clones share the same engine
#[derive(Clone)]
pub struct CameraEngine {
    shared: Arc<EngineShared>,
}

impl CameraEngine {
    pub fn builder(hardware: CameraHardware) -> EngineBuilder {
        EngineBuilder {
            hardware,
            config: EngineConfig::default(),
            callback: Arc::new(NoopCallback),
            preview: Arc::new(SimulatedPreview::new()),
            recorders: Arc::new(DefaultRecorderFactory::new()),
            runtime: None,
        }
    }

    fn ctx(&self) -> &Arc<EngineContext> {
        &self.shared.ctx
    }

    pub fn kind(&self) -> BackendKind {
        self.shared.kind
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.shared.ctx.orchestrator
    }

    pub fn state(&self) -> CameraState {
        self.ctx().state()
    }

    pub fn target_state(&self) -> CameraState {
        self.ctx().target_state()
    }

    /// Wrap `job` so the engine is only held while it runs
    fn job<F, Fut>(&self, job: F) -> impl FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send + 'static
    where
        F: FnOnce(CameraEngine) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        move || {
            async move {
                let shared = weak.upgrade().ok_or(EngineError::Cancelled)?;
                job(CameraEngine { shared }).await
            }
            .boxed()
        }
    }

    // ===== Lifecycle =====

    /// Open the camera, then bind and start the preview once a surface exists
    ///
    /// Resolves with the first failure of the three steps. Binding without a
    /// surface is skipped, not failed.
    pub fn start(&self) -> Task {
        self.shared.suppress_errors.store(false, Ordering::SeqCst);
        info!(state = %self.state(), "Start scheduled");
        let engine = self.start_engine();
        let bind = self.start_bind();
        let preview = self.start_preview();
        Task::from_future(async move {
            engine.await?;
            tolerate_cancelled(bind.await)?;
            tolerate_cancelled(preview.await)
        })
    }

    /// Tear everything down; resolves when the camera is closed
    pub fn stop(&self, swallow_errors: bool) -> Task {
        info!(state = %self.state(), swallow_errors, "Stop scheduled");
        let _ = self.stop_preview(swallow_errors);
        let _ = self.stop_bind(swallow_errors);
        self.stop_engine(swallow_errors)
    }

    pub fn restart(&self) -> Task {
        info!(state = %self.state(), "Restart scheduled");
        let _ = self.stop(false);
        self.start()
    }

    pub fn restart_bind(&self) -> Task {
        info!(state = %self.state(), "Restart bind scheduled");
        let _ = self.stop_preview(false);
        let _ = self.stop_bind(false);
        let _ = self.start_bind();
        self.start_preview()
    }

    pub fn restart_preview(&self) -> Task {
        info!(state = %self.state(), "Restart preview scheduled");
        let _ = self.stop_preview(false);
        self.start_preview()
    }

    /// Stop the engine, abandoning a stuck worker if needed
    ///
    /// Each attempt waits up to the configured release timeout. After the
    /// last attempt the engine is left as is and a timeout error returned.
    /// With `unrecoverably` set, failures during teardown are not reported.
    pub async fn destroy(&self, unrecoverably: bool) -> EngineResult<()> {
        if unrecoverably {
            self.shared.suppress_errors.store(true, Ordering::SeqCst);
        }
        let (timeout, attempts) = {
            let core = self.ctx().core();
            (core.settings.release_timeout(), core.settings.destroy_retries.max(1))
        };
        for attempt in 1..=attempts {
            info!(attempt, state = %self.state(), "Destroying engine");
            match tokio::time::timeout(timeout, self.stop(true)).await {
                Ok(stopped) => {
                    if let Err(e) = stopped {
                        warn!(error = %e, "Error while stopping for destroy");
                    }
                    info!(state = %self.state(), "Engine destroyed");
                    return Ok(());
                }
                Err(_) => {
                    error!(attempt, timeout_ms = timeout.as_millis() as u64, "Could not destroy in time");
                    if attempt < attempts {
                        self.orchestrator().restart_worker();
                    }
                }
            }
        }
        warn!(attempts, "Giving up on destroy");
        Err(EngineError::Timeout(format!("engine not released after {} attempts", attempts)))
    }

    fn start_engine(&self) -> Task {
        let job = self.job(|engine| async move {
            let facing = engine.ctx().core().params.facing;
            let mut backend = engine.shared.backend.lock().await;
            if !backend.collect_camera_info(facing) {
                return Err(EngineError::camera(
                    ErrorReason::NoCamera,
                    format!("no camera facing {}", facing),
                ));
            }
            let options = backend.on_start_engine().await?;
            engine.ctx().core().options = Some(options.clone());
            engine.apply_all_parameters(&mut **backend).await;
            drop(backend);
            engine.ctx().callback.on_camera_opened(&options);
            Ok(())
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Off, CameraState::Engine, true, job)
    }

    fn start_bind(&self) -> Task {
        let job = self.job(|engine| async move {
            if !engine.ctx().preview.has_surface() {
                debug!("No preview surface, not binding");
                return Err(EngineError::Cancelled);
            }
            let mut backend = engine.shared.backend.lock().await;
            backend.on_start_bind().await
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Engine, CameraState::Bind, true, job)
    }

    fn start_preview(&self) -> Task {
        let job = self.job(|engine| async move {
            let mut backend = engine.shared.backend.lock().await;
            backend.on_start_preview().await
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Bind, CameraState::Preview, true, job)
    }

    fn stop_preview(&self, swallow_errors: bool) -> Task {
        let job = self.job(|engine| async move {
            let mut backend = engine.shared.backend.lock().await;
            backend.on_stop_preview().await
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Preview, CameraState::Bind, !swallow_errors, job)
    }

    fn stop_bind(&self, swallow_errors: bool) -> Task {
        let job = self.job(|engine| async move {
            let mut backend = engine.shared.backend.lock().await;
            let result = backend.on_stop_bind().await;
            engine.ctx().core().clear_bind_sizes();
            result
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Bind, CameraState::Engine, !swallow_errors, job)
    }

    fn stop_engine(&self, swallow_errors: bool) -> Task {
        let job = self.job(|engine| async move {
            let mut backend = engine.shared.backend.lock().await;
            let result = backend.on_stop_engine().await;
            drop(backend);
            {
                let mut core = engine.ctx().core();
                core.options = None;
                core.picture_recorder = None;
                core.video_recorder = None;
            }
            if result.is_ok() {
                engine.ctx().callback.on_camera_closed();
            }
            result
        });
        self.orchestrator()
            .schedule_state_change(CameraState::Engine, CameraState::Off, !swallow_errors, job)
    }

    // ===== Preview surface =====

    pub fn on_surface_available(&self) {
        info!(size = ?self.ctx().preview.surface_size(), "Surface available");
        let _ = self.start_bind();
        let _ = self.start_preview();
    }

    /// Recompute the preview stream size for the new surface size
    pub fn on_surface_changed(&self) -> Task {
        info!(size = ?self.ctx().preview.surface_size(), "Surface changed");
        let job = self.job(|engine| async move {
            let available = engine.shared.backend.lock().await.preview_stream_available_sizes();
            let surface = engine.ctx().preview.surface_size();
            let view_size = {
                let mut core = engine.ctx().core();
                let size = core.compute_preview_stream_size(&available, surface)?;
                if core.preview_stream_size == Some(size) {
                    debug!(size = %size, "Preview stream size unchanged");
                    return Ok(());
                }
                core.preview_stream_size = Some(size);
                core.preview_stream_size_in(Reference::View)
            };
            if let Some(size) = view_size {
                engine.ctx().preview.set_stream_size(size);
            }
            engine.ctx().callback.on_preview_stream_size_changed();
            let _ = match engine.shared.capabilities.preview_restart {
                RestartScope::Preview => engine.restart_preview(),
                RestartScope::Bind => engine.restart_bind(),
            };
            Ok(())
        });
        self.orchestrator()
            .schedule_stateful("surface changed", CameraState::Bind, job)
    }

    pub fn on_surface_destroyed(&self) {
        info!("Surface destroyed");
        let _ = self.stop_preview(false);
        let _ = self.stop_bind(false);
    }

    // ===== Errors =====

    fn handle_error(&self, job: &str, error: EngineError) {
        if self.shared.suppress_errors.load(Ordering::SeqCst) {
            debug!(job, error = %error, "Ignoring error during unrecoverable destroy");
            return;
        }
        match &error {
            EngineError::Cancelled => return,
            EngineError::Precondition(_) | EngineError::Unsupported(_) => {
                warn!(job, error = %error, "Request rejected");
                return;
            }
            _ => {}
        }

        let engine = self.clone();
        let job = job.to_string();
        self.ctx().runtime.spawn(async move {
            match error {
                EngineError::Camera(camera_error) => {
                    if camera_error.is_unrecoverable() {
                        error!(job = %job, error = %camera_error, "Unrecoverable camera error, destroying");
                        if let Err(e) = engine.destroy(false).await {
                            error!(error = %e, "Destroy after camera error failed");
                        }
                    } else {
                        warn!(job = %job, error = %camera_error, "Camera error");
                    }
                    engine.ctx().callback.on_camera_error(&camera_error);
                }
                other => {
                    error!(job = %job, error = %other, "Unexpected error, destroying");
                    if let Err(e) = engine.destroy(true).await {
                        error!(error = %e, "Destroy after unexpected error failed");
                    }
                    engine
                        .ctx()
                        .callback
                        .on_camera_error(&CameraError::new(ErrorReason::Unknown, other.to_string()));
                }
            }
        });
    }

    // ===== Parameters =====

    async fn apply_all_parameters(&self, backend: &mut dyn CameraBackend) {
        let requested = self.ctx().core().params.live_parameters();
        for value in requested {
            if let Err(e) = self.apply_parameter(backend, value).await {
                warn!(parameter = ?value, error = %e, "Could not apply parameter on open");
            }
        }
    }

    /// Resolve and push `requested`; roll back when it does not stick
    async fn apply_parameter(&self, backend: &mut dyn CameraBackend, requested: Parameter) -> EngineResult<bool> {
        let resolved = {
            let core = self.ctx().core();
            requested.resolve(core.options()?, core.settings.preview_frame_rate_exact)
        };
        let outcome = match resolved {
            Some(change) => backend
                .apply_parameter(change)
                .await
                .map(|accepted| accepted.then_some(change)),
            None => Ok(None),
        };

        let mut core = self.ctx().core();
        match outcome {
            Ok(Some(change)) => {
                let applied = change.as_parameter();
                core.applied.set(applied);
                if core.params.holds(&requested) {
                    core.params.set(applied);
                }
                Ok(true)
            }
            Ok(None) => {
                debug!(parameter = ?requested, "Parameter not supported, rolling back");
                roll_back(&mut core, &requested);
                Ok(false)
            }
            Err(e) => {
                roll_back(&mut core, &requested);
                Err(e)
            }
        }
    }

    fn set_parameter(&self, value: Parameter, notice: Option<ChangeNotice>) -> Task {
        if !value.is_finite() {
            return Task::ready(Err(EngineError::Precondition(format!("{:?} is not a finite value", value))));
        }
        let name = value.job_name();
        let previous = self.ctx().core().params.set(value);
        debug!(parameter = ?value, previous = ?previous, "Parameter requested");

        let job = self.job(move |engine| async move {
            let current = engine.ctx().core().params.get(&value);
            let mut backend = engine.shared.backend.lock().await;
            let accepted = engine.apply_parameter(&mut **backend, current).await?;
            drop(backend);
            if accepted && let Some(notice) = notice {
                engine.notify_change(notice);
            }
            Ok(())
        });
        let task = self.orchestrator().schedule_stateful(&name, CameraState::Engine, job);
        match value {
            Parameter::Zoom(_) => self.orchestrator().trim(&name, jobs::ALLOWED_ZOOM_OPS),
            Parameter::ExposureCorrection(_) => self.orchestrator().trim(&name, jobs::ALLOWED_EV_OPS),
            _ => {}
        }
        task
    }

    fn notify_change(&self, notice: ChangeNotice) {
        let (zoom, exposure) = {
            let core = self.ctx().core();
            (core.params.zoom, core.params.exposure_correction)
        };
        match notice {
            ChangeNotice::Zoom(points) => self.ctx().callback.on_zoom_changed(zoom, points.as_deref()),
            ChangeNotice::ExposureCorrection(bounds, points) => {
                self.ctx()
                    .callback
                    .on_exposure_correction_changed(exposure, bounds, points.as_deref())
            }
        }
    }

    pub fn set_flash(&self, flash: Flash) -> Task {
        self.set_parameter(Parameter::Flash(flash), None)
    }

    pub fn set_white_balance(&self, white_balance: WhiteBalance) -> Task {
        self.set_parameter(Parameter::WhiteBalance(white_balance), None)
    }

    pub fn set_hdr(&self, hdr: Hdr) -> Task {
        self.set_parameter(Parameter::Hdr(hdr), None)
    }

    pub fn set_location(&self, location: Option<Location>) -> Task {
        self.set_parameter(Parameter::Location(location), None)
    }

    pub fn set_play_sounds(&self, play_sounds: bool) -> Task {
        self.set_parameter(Parameter::PlaySounds(play_sounds), None)
    }

    /// Requested preview frame rate, 0 for automatic
    pub fn set_preview_frame_rate(&self, rate: f32) -> Task {
        self.set_parameter(Parameter::PreviewFrameRate(rate), None)
    }

    /// Zoom in 0..=1; `notify` reports the applied value through the callback
    pub fn set_zoom(&self, zoom: f32, points: Option<Vec<PointF>>, notify: bool) -> Task {
        let notice = notify.then(|| ChangeNotice::Zoom(points));
        self.set_parameter(Parameter::Zoom(zoom), notice)
    }

    pub fn set_exposure_correction(
        &self,
        ev: f32,
        bounds: [f32; 2],
        points: Option<Vec<PointF>>,
        notify: bool,
    ) -> Task {
        let notice = notify.then(|| ChangeNotice::ExposureCorrection(bounds, points));
        self.set_parameter(Parameter::ExposureCorrection(ev), notice)
    }

    /// Switch cameras; reverts when no camera faces that way
    pub fn set_facing(&self, facing: Facing) -> Task {
        let old = {
            let mut core = self.ctx().core();
            let old = core.params.facing;
            if old == facing {
                return Task::ready(Ok(()));
            }
            core.params.facing = facing;
            old
        };
        let job = self.job(move |engine| async move {
            let found = engine.shared.backend.lock().await.collect_camera_info(facing);
            if found {
                let _ = engine.restart();
            } else {
                warn!(facing = %facing, "No camera with this facing, reverting");
                engine.ctx().core().params.facing = old;
            }
            Ok(())
        });
        self.orchestrator().schedule_stateful("facing", CameraState::Engine, job)
    }

    pub fn set_mode(&self, mode: Mode) -> Task {
        {
            let mut core = self.ctx().core();
            if core.params.mode == mode {
                return Task::ready(Ok(()));
            }
            core.params.mode = mode;
        }
        let job = self.job(|engine| async move {
            let _ = engine.restart();
            Ok(())
        });
        self.orchestrator().schedule_stateful("mode", CameraState::Engine, job)
    }

    /// Takes effect on the next recording
    pub fn set_audio(&self, audio: Audio) {
        let mut core = self.ctx().core();
        if core.is_taking_video() {
            warn!(audio = ?audio, "Audio changed while recording, applies to the next video");
        }
        core.params.audio = audio;
    }

    pub fn set_picture_format(&self, format: PictureFormat) -> Task {
        if !self.shared.capabilities.picture_formats.contains(&format) {
            return Task::ready(Err(EngineError::Unsupported(format!(
                "picture format {} on the {} backend",
                format, self.shared.kind
            ))));
        }
        {
            let mut core = self.ctx().core();
            if core.params.picture_format == format {
                return Task::ready(Ok(()));
            }
            core.params.picture_format = format;
        }
        let job = self.job(|engine| async move {
            let _ = engine.restart_bind();
            Ok(())
        });
        self.orchestrator()
            .schedule_stateful(&format!("picture format ({})", format), CameraState::Engine, job)
    }

    pub fn set_has_frame_processors(&self, enabled: bool) -> Task {
        self.update_frame_processing(FrameProcessingUpdate::Processors(enabled))
    }

    pub fn set_frame_processing_format(&self, format: FrameFormat) -> Task {
        self.update_frame_processing(FrameProcessingUpdate::Format(format))
    }

    fn update_frame_processing(&self, update: FrameProcessingUpdate) -> Task {
        if !self.shared.capabilities.rebind_for_frame_processing {
            update.apply(&mut self.ctx().core().params);
            return Task::ready(Ok(()));
        }
        let job = self.job(move |engine| async move {
            let state = engine.state();
            if state.is_at_least(CameraState::Bind) && engine.orchestrator().has_pending_state_change() {
                // Changed in the middle of a transition, retry after it
                let _ = engine.update_frame_processing(update);
                return Ok(());
            }
            if !update.apply(&mut engine.ctx().core().params) {
                return Ok(());
            }
            if state.is_at_least(CameraState::Bind) {
                let _ = engine.restart_bind();
            }
            Ok(())
        });
        self.orchestrator().schedule(&update.job_name(), true, job)
    }

    pub fn set_preview_frame_rate_exact(&self, exact: bool) {
        self.ctx().core().settings.preview_frame_rate_exact = exact;
    }

    pub fn set_video_settings(&self, video: VideoSettings) {
        self.ctx().core().settings.video = video;
    }

    pub fn set_picture_metering(&self, metering: bool) {
        self.ctx().core().settings.picture_metering = metering;
    }

    pub fn set_picture_snapshot_metering(&self, metering: bool) {
        self.ctx().core().settings.picture_snapshot_metering = metering;
    }

    /// Bounding box for snapshots, 0 for unbounded
    pub fn set_snapshot_max_size(&self, width: i32, height: i32) {
        let mut core = self.ctx().core();
        core.settings.snapshot_max_width = width;
        core.settings.snapshot_max_height = height;
    }

    /// Bounding box for frame processing; applies on the next bind
    pub fn set_frame_processing_max_size(&self, width: i32, height: i32) {
        let mut core = self.ctx().core();
        core.settings.frame_processing_max_width = width;
        core.settings.frame_processing_max_height = height;
    }

    /// Applies on the next bind
    pub fn set_frame_processing_pool_size(&self, pool_size: usize) {
        self.ctx().core().settings.frame_processing_pool_size = pool_size.max(1);
    }

    /// Delay before touch focus returns to continuous focus; zero disables
    pub fn set_auto_focus_reset_delay(&self, delay: Duration) {
        self.ctx().core().settings.auto_focus_reset_delay_ms = delay.as_millis() as u64;
    }

    pub fn set_picture_size_selector(&self, selector: Option<SizeSelector>) {
        self.ctx().core().picture_selector = selector;
    }

    pub fn set_video_size_selector(&self, selector: Option<SizeSelector>) {
        self.ctx().core().video_selector = selector;
    }

    pub fn set_preview_stream_size_selector(&self, selector: Option<SizeSelector>) {
        self.ctx().core().preview_stream_selector = selector;
    }

    /// Clockwise rotation of the display from its natural orientation
    pub fn set_display_offset(&self, degrees: i32) {
        self.ctx().core().angles.set_display_offset(degrees);
    }

    /// Clockwise rotation the user holds the device at
    pub fn set_device_orientation(&self, degrees: i32) {
        self.ctx().core().angles.set_device_orientation(degrees);
    }

    // ===== Capture =====

    pub fn take_picture(&self) -> Task {
        let (metering, mode) = {
            let core = self.ctx().core();
            (core.settings.picture_metering, core.params.mode)
        };
        if mode == Mode::Video {
            return Task::ready(Err(picture_in_video_mode()));
        }
        let job = self.job(move |engine| async move {
            let stub = {
                let core = engine.ctx().core();
                if core.is_taking_picture() {
                    debug!("Already taking a picture");
                    return Ok(());
                }
                if core.params.mode == Mode::Video {
                    return Err(picture_in_video_mode());
                }
                PictureResult::request(false, core.params.location, core.params.facing, core.params.picture_format)
            };
            let mut backend = engine.shared.backend.lock().await;
            backend.take_picture(stub, metering).await
        });
        self.orchestrator().schedule_stateful("take picture", CameraState::Bind, job)
    }

    pub fn take_picture_snapshot(&self) -> Task {
        let metering = self.ctx().core().settings.picture_snapshot_metering;
        let job = self.job(move |engine| async move {
            let surface = engine.ctx().preview.surface_size();
            let (stub, ratio) = {
                let core = engine.ctx().core();
                if core.is_taking_picture() {
                    debug!("Already taking a picture");
                    return Ok(());
                }
                let ratio = core
                    .output_ratio(surface)
                    .ok_or_else(|| EngineError::Precondition("preview surface not available".to_string()))?;
                let stub = PictureResult::request(true, core.params.location, core.params.facing, PictureFormat::Jpeg);
                (stub, ratio)
            };
            let mut backend = engine.shared.backend.lock().await;
            backend.take_picture_snapshot(stub, ratio, metering).await
        });
        self.orchestrator()
            .schedule_stateful("take picture snapshot", CameraState::Bind, job)
    }

    /// Record a full-quality video into `file`
    pub fn take_video(&self, file: impl Into<PathBuf>) -> Task {
        let file = file.into();
        if file.as_os_str().is_empty() {
            return Task::ready(Err(EngineError::Precondition("no video file given".to_string())));
        }
        if self.ctx().core().params.mode == Mode::Picture {
            return Task::ready(Err(video_in_picture_mode()));
        }
        let job = self.job(move |engine| async move {
            let stub = {
                let core = engine.ctx().core();
                if core.is_taking_video() {
                    debug!("Already taking a video");
                    return Ok(());
                }
                if core.params.mode == Mode::Picture {
                    return Err(video_in_picture_mode());
                }
                video_request(&core, false, file)
            };
            let mut backend = engine.shared.backend.lock().await;
            backend.take_video(stub).await
        });
        self.orchestrator().schedule_stateful("take video", CameraState::Bind, job)
    }

    /// Record the preview stream into `file`, cropped to the surface ratio
    pub fn take_video_snapshot(&self, file: impl Into<PathBuf>) -> Task {
        let file = file.into();
        if file.as_os_str().is_empty() {
            return Task::ready(Err(EngineError::Precondition("no video file given".to_string())));
        }
        let job = self.job(move |engine| async move {
            let surface = engine.ctx().preview.surface_size();
            let (stub, ratio) = {
                let core = engine.ctx().core();
                if core.is_taking_video() {
                    debug!("Already taking a video");
                    return Ok(());
                }
                let ratio = core
                    .output_ratio(surface)
                    .ok_or_else(|| EngineError::Precondition("preview surface not available".to_string()))?;
                (video_request(&core, true, file), ratio)
            };
            let mut backend = engine.shared.backend.lock().await;
            backend.take_video_snapshot(stub, ratio).await
        });
        self.orchestrator()
            .schedule_stateful("take video snapshot", CameraState::Bind, job)
    }

    pub fn stop_video(&self) -> Task {
        let job = self.job(|engine| async move {
            let recorder = engine.ctx().core().video_recorder.take();
            match recorder {
                Some(mut recorder) => {
                    recorder.stop(true);
                    // The result job clears the slot
                    engine.ctx().core().video_recorder = Some(recorder);
                }
                None => debug!("No video to stop"),
            }
            Ok(())
        });
        self.orchestrator().schedule("stop video", true, job)
    }

    // ===== Focus =====

    /// Focus and meter around `point`, in preview surface pixels
    pub fn start_auto_focus(&self, point: PointF) -> Task {
        let job = self.job(move |engine| async move {
            let supported = engine
                .ctx()
                .core()
                .options
                .as_ref()
                .is_some_and(|options| options.auto_focus_supported);
            if !supported {
                debug!("Auto focus not supported");
                return Ok(());
            }
            let mut backend = engine.shared.backend.lock().await;
            backend.start_auto_focus(point).await
        });
        self.orchestrator().schedule_stateful("auto focus", CameraState::Bind, job)
    }

    // ===== Recorder results =====

    fn finish_picture(&self, result: EngineResult<PictureResult>) {
        self.ctx().core().picture_recorder = None;
        match result {
            Ok(picture) => {
                info!(size = %picture.size, snapshot = picture.is_snapshot, "Picture taken");
                self.ctx().callback.on_picture_taken(picture);
            }
            Err(e) => {
                warn!(error = %e, "Picture failed");
                self.ctx()
                    .callback
                    .on_camera_error(&recorder_error(e, ErrorReason::PictureFailed));
            }
        }
    }

    fn finish_video(&self, result: EngineResult<VideoResult>) {
        self.ctx().core().video_recorder = None;
        let success = result.is_ok();
        match result {
            Ok(video) => {
                info!(file = %video.file.display(), size = %video.size, "Video taken");
                self.ctx().callback.on_video_taken(video);
            }
            Err(e) => {
                warn!(error = %e, "Video failed");
                self.ctx()
                    .callback
                    .on_camera_error(&recorder_error(e, ErrorReason::VideoFailed));
            }
        }
        let job = self.job(move |engine| async move {
            let mut backend = engine.shared.backend.lock().await;
            backend.on_video_result(success).await
        });
        let _ = self
            .orchestrator()
            .schedule_stateful("restore after video", CameraState::Bind, job);
    }

    // ===== Getters =====

    pub async fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        self.shared.backend.lock().await.enumerate_cameras()
    }

    /// Capabilities of the open camera
    pub fn options(&self) -> Option<CameraOptions> {
        self.ctx().core().options.clone()
    }

    /// Requested values of every setting
    pub fn parameters(&self) -> ParameterSet {
        self.ctx().core().params.clone()
    }

    pub fn facing(&self) -> Facing {
        self.ctx().core().params.facing
    }

    pub fn mode(&self) -> Mode {
        self.ctx().core().params.mode
    }

    pub fn flash(&self) -> Flash {
        self.ctx().core().params.flash
    }

    pub fn white_balance(&self) -> WhiteBalance {
        self.ctx().core().params.white_balance
    }

    pub fn hdr(&self) -> Hdr {
        self.ctx().core().params.hdr
    }

    pub fn zoom(&self) -> f32 {
        self.ctx().core().params.zoom
    }

    pub fn exposure_correction(&self) -> f32 {
        self.ctx().core().params.exposure_correction
    }

    pub fn picture_format(&self) -> PictureFormat {
        self.ctx().core().params.picture_format
    }

    pub fn angles(&self) -> Angles {
        self.ctx().core().angles.clone()
    }

    pub fn is_taking_picture(&self) -> bool {
        self.ctx().core().is_taking_picture()
    }

    pub fn is_taking_video(&self) -> bool {
        self.ctx().core().is_taking_video()
    }

    pub fn picture_size(&self, reference: Reference) -> Option<Size> {
        self.ctx().core().picture_size(reference)
    }

    pub fn video_size(&self, reference: Reference) -> Option<Size> {
        self.ctx().core().video_size(reference)
    }

    pub fn preview_stream_size(&self, reference: Reference) -> Option<Size> {
        self.ctx().core().preview_stream_size_in(reference)
    }

    pub fn frame_processing_size(&self, reference: Reference) -> Option<Size> {
        self.ctx().core().frame_processing_size_in(reference)
    }

    pub fn uncropped_snapshot_size(&self, reference: Reference) -> Option<Size> {
        self.ctx().core().uncropped_snapshot_size(reference)
    }
}

impl std::fmt::Debug for CameraEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraEngine")
            .field("kind", &self.shared.kind)
            .field("ctx", &self.shared.ctx)
            .finish()
    }
}

fn roll_back(core: &mut EngineCore, requested: &Parameter) {
    if core.params.holds(requested) {
        let applied = core.applied.get(requested);
        core.params.set(applied);
    }
}

fn tolerate_cancelled(result: EngineResult<()>) -> EngineResult<()> {
    match result {
        Err(EngineError::Cancelled) => Ok(()),
        other => other,
    }
}

fn picture_in_video_mode() -> EngineError {
    EngineError::Precondition("can't take full pictures while in VIDEO mode".to_string())
}

fn video_in_picture_mode() -> EngineError {
    EngineError::Precondition("can't record video while in PICTURE mode".to_string())
}

fn video_request(core: &EngineCore, is_snapshot: bool, file: PathBuf) -> VideoResult {
    let video = &core.settings.video;
    let mut stub = VideoResult::request(is_snapshot, core.params.location, core.params.facing, file);
    stub.video_codec = video.video_codec;
    stub.audio_codec = video.audio_codec;
    stub.audio = core.params.audio;
    stub.max_size_bytes = video.max_size_bytes;
    stub.max_duration_ms = video.max_duration_ms;
    stub.video_bit_rate = video.video_bit_rate;
    stub.audio_bit_rate = video.audio_bit_rate;
    stub
}

/// Reason-tagged error for a failed recording
fn recorder_error(error: EngineError, reason: ErrorReason) -> CameraError {
    match error {
        EngineError::Camera(e) if e.reason == reason => e,
        other => CameraError::new(reason, other.to_string()),
    }
}

/// Turns recorder progress into engine jobs
struct RecorderEvents {
    engine: Weak<EngineShared>,
}

impl RecorderEvents {
    fn dispatch<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&CameraEngine) + Send + 'static,
    {
        let Some(shared) = self.engine.upgrade() else {
            debug!(job = name, "Engine gone, dropping recorder event");
            return;
        };
        let engine = CameraEngine { shared };
        let job = engine.job(move |engine| async move {
            f(&engine);
            Ok(())
        });
        let _ = engine.orchestrator().schedule(name, false, job);
    }
}

impl RecorderListener for RecorderEvents {
    fn on_picture_shutter(&self, did_play_sound: bool) {
        // Ask the app to play a sound only if the hardware did not
        self.dispatch("picture shutter", move |engine| {
            engine.ctx().callback.on_shutter(!did_play_sound)
        });
    }

    fn on_picture_result(&self, result: EngineResult<PictureResult>) {
        self.dispatch("picture result", move |engine| engine.finish_picture(result));
    }

    fn on_video_recording_start(&self) {
        self.dispatch("video recording start", |engine| {
            engine.ctx().callback.on_video_recording_start()
        });
    }

    fn on_video_recording_end(&self) {
        self.dispatch("video recording end", |engine| {
            engine.ctx().callback.on_video_recording_end()
        });
    }

    fn on_video_result(&self, result: EngineResult<VideoResult>) {
        self.dispatch("video result", move |engine| engine.finish_video(result));
    }
}
