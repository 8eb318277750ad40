// SPDX-License-Identifier: GPL-3.0-only

//! Simulated session hardware
//!
//! A fully featured back camera and a limited front camera. Each open
//! session runs a frame loop that answers the repeating request every frame
//! and single captures in between, with a small 3A model: triggers take
//! effect on the frame they first appear in and states settle over a few
//! frames.

use super::device::{
    AeMode, AeState, AfMode, AfState, AwbMode, AwbState, CaptureListener, CaptureRequest, CaptureResult,
    CaptureSession, DeviceErrorCallback, HardwareLevel, Image, LENS_FACING_BACK, LENS_FACING_FRONT, OpenCallback,
    SceneMode, SessionCallback, SessionCameraApi, SessionCharacteristics, SessionDevice, SessionError, StreamConfig,
    StreamFormat, StreamRole, Template, Trigger,
};
use crate::backends::camera::faults::FaultInjector;
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::constants::timing;
use crate::engine::controls::FrameFormat;
use crate::engine::options::FpsRange;
use crate::pipelines::photo::encode_placeholder;
use crate::size::Size;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Frames a scan or a precapture sequence takes to settle
const SETTLE_FRAMES: u32 = 3;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(|_| ())
        .map_err(|e| SessionError::Runtime(e.to_string()))
}

pub(crate) fn back_characteristics() -> SessionCharacteristics {
    SessionCharacteristics {
        name: "Simulated back camera".to_string(),
        lens_facing: LENS_FACING_BACK,
        sensor_orientation: 90,
        hardware_level: HardwareLevel::Full,
        active_array: Size::new(4032, 3024),
        max_digital_zoom: 8.0,
        ae_compensation_range: (-12, 12),
        ae_compensation_step: 1.0 / 6.0,
        ae_available_modes: vec![
            AeMode::Off,
            AeMode::On,
            AeMode::OnAutoFlash,
            AeMode::OnAlwaysFlash,
            AeMode::OnAutoFlashRedeye,
        ],
        af_available_modes: vec![
            AfMode::Off,
            AfMode::Auto,
            AfMode::Macro,
            AfMode::ContinuousVideo,
            AfMode::ContinuousPicture,
        ],
        awb_available_modes: vec![
            AwbMode::Off,
            AwbMode::Auto,
            AwbMode::Incandescent,
            AwbMode::Fluorescent,
            AwbMode::Daylight,
            AwbMode::CloudyDaylight,
        ],
        scene_modes: vec![SceneMode::Disabled, SceneMode::Hdr],
        flash_available: true,
        fps_ranges: vec![FpsRange::new(15, 30), FpsRange::new(30, 30), FpsRange::new(7, 60)],
        max_regions_ae: 1,
        max_regions_af: 1,
        max_regions_awb: 1,
        raw_supported: true,
        preview_sizes: vec![
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(960, 720),
            Size::new(640, 480),
            Size::new(320, 240),
        ],
        jpeg_sizes: vec![
            Size::new(4032, 3024),
            Size::new(4000, 2250),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ],
        raw_sizes: vec![Size::new(4032, 3024)],
        frame_sizes: vec![
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
            Size::new(320, 240),
        ],
        frame_formats: vec![FrameFormat::Yuv420, FrameFormat::Rgba8888],
        recorder_sizes: vec![
            Size::new(3840, 2160),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ],
        max_video_size: Some(Size::new(1920, 1080)),
    }
}

pub(crate) fn front_characteristics() -> SessionCharacteristics {
    SessionCharacteristics {
        name: "Simulated front camera".to_string(),
        lens_facing: LENS_FACING_FRONT,
        sensor_orientation: 270,
        hardware_level: HardwareLevel::Limited,
        active_array: Size::new(2592, 1944),
        max_digital_zoom: 1.0,
        ae_compensation_range: (-4, 4),
        ae_compensation_step: 0.5,
        ae_available_modes: vec![AeMode::On],
        af_available_modes: vec![AfMode::Off],
        awb_available_modes: vec![AwbMode::Auto],
        scene_modes: vec![SceneMode::Disabled],
        flash_available: false,
        fps_ranges: vec![FpsRange::new(15, 30)],
        max_regions_ae: 0,
        max_regions_af: 0,
        max_regions_awb: 0,
        raw_supported: false,
        preview_sizes: vec![Size::new(1280, 720), Size::new(640, 480), Size::new(320, 240)],
        jpeg_sizes: vec![Size::new(2592, 1944), Size::new(1280, 720), Size::new(640, 480)],
        raw_sizes: Vec::new(),
        frame_sizes: vec![Size::new(640, 480), Size::new(320, 240)],
        frame_formats: vec![FrameFormat::Yuv420],
        recorder_sizes: vec![Size::new(1280, 720), Size::new(640, 480)],
        max_video_size: Some(Size::new(1280, 720)),
    }
}

/// Session API over two simulated cameras
pub struct SimulatedSessionApi {
    cameras: Vec<(String, SessionCharacteristics)>,
    faults: Arc<FaultInjector>,
    opened: Mutex<Vec<Weak<DeviceInner>>>,
}

impl Default for SimulatedSessionApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSessionApi {
    pub fn new() -> Self {
        Self {
            cameras: vec![
                ("0".to_string(), back_characteristics()),
                ("1".to_string(), front_characteristics()),
            ],
            faults: Arc::new(FaultInjector::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Disconnect every open device, as when another client takes the camera
    pub fn disconnect(&self) {
        let opened: Vec<Arc<DeviceInner>> = lock(&self.opened).iter().filter_map(Weak::upgrade).collect();
        for device in opened {
            warn!(id = %device.id, "Simulated session device disconnected");
            device.shut_down();
            (device.on_error)(SessionError::Disconnected);
        }
    }
}

impl SessionCameraApi for SimulatedSessionApi {
    fn camera_ids(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.cameras.iter().map(|(id, _)| id.clone()).collect())
    }

    fn characteristics(&self, id: &str) -> Result<SessionCharacteristics, SessionError> {
        self.cameras
            .iter()
            .find(|(camera_id, _)| camera_id == id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| SessionError::Runtime(format!("unknown camera {}", id)))
    }

    fn open(&self, id: &str, callback: OpenCallback, on_error: DeviceErrorCallback) -> Result<(), SessionError> {
        let characteristics = self.characteristics(id)?;
        if self.faults.take_open() {
            return spawn("session-open", move || callback(Err(SessionError::InUse)));
        }
        let inner = Arc::new(DeviceInner {
            id: id.to_string(),
            characteristics,
            faults: Arc::clone(&self.faults),
            on_error,
            state: Mutex::new(DeviceState::default()),
        });
        {
            let mut opened = lock(&self.opened);
            opened.retain(|w| w.strong_count() > 0);
            opened.push(Arc::downgrade(&inner));
        }
        info!(id, "Simulated session device opened");
        let device: Arc<dyn SessionDevice> = Arc::new(SimulatedSessionDevice { inner });
        spawn("session-open", move || callback(Ok(device)))
    }
}

#[derive(Default)]
struct DeviceState {
    closed: bool,
    session: Option<Arc<SessionInner>>,
}

struct DeviceInner {
    id: String,
    characteristics: SessionCharacteristics,
    faults: Arc<FaultInjector>,
    on_error: DeviceErrorCallback,
    state: Mutex<DeviceState>,
}

impl DeviceInner {
    fn shut_down(&self) {
        let session = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.session.take()
        };
        if let Some(session) = session {
            session.close();
        }
    }
}

/// One open simulated device
pub struct SimulatedSessionDevice {
    inner: Arc<DeviceInner>,
}

fn check_output(characteristics: &SessionCharacteristics, output: &StreamConfig) -> Result<(), SessionError> {
    let supported: &[Size] = match output.format {
        StreamFormat::Surface(_) => &characteristics.preview_sizes,
        StreamFormat::Picture(format) => characteristics.picture_sizes(format),
        StreamFormat::Frames(format) => {
            if format != FrameFormat::Yuv420 && !characteristics.frame_formats.contains(&format) {
                return Err(SessionError::ConfigureFailed(format!("unsupported frame format {}", format)));
            }
            &characteristics.frame_sizes
        }
        StreamFormat::Encoder => &characteristics.recorder_sizes,
    };
    if !supported.contains(&output.size) {
        return Err(SessionError::ConfigureFailed(format!(
            "unsupported {:?} size {}",
            output.role, output.size
        )));
    }
    Ok(())
}

impl SessionDevice for SimulatedSessionDevice {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn create_request(&self, template: Template) -> Result<CaptureRequest, SessionError> {
        if lock(&self.inner.state).closed {
            return Err(SessionError::Runtime("device closed".to_string()));
        }
        let mut request = CaptureRequest::new(template);
        let preferred = match template {
            Template::Record => AfMode::ContinuousVideo,
            Template::Preview | Template::StillCapture => AfMode::ContinuousPicture,
        };
        let modes = &self.inner.characteristics.af_available_modes;
        request.af_mode = Some(if modes.contains(&preferred) { preferred } else { AfMode::Off });
        Ok(request)
    }

    fn create_session(&self, outputs: Vec<StreamConfig>, callback: SessionCallback) -> Result<(), SessionError> {
        let previous = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(SessionError::Runtime("device closed".to_string()));
            }
            state.session.take()
        };
        if let Some(previous) = previous {
            previous.close();
        }

        let checked = if self.inner.faults.take_bind() {
            Err(SessionError::ConfigureFailed("outputs rejected".to_string()))
        } else {
            outputs
                .iter()
                .try_for_each(|output| check_output(&self.inner.characteristics, output))
        };
        if let Err(e) = checked {
            warn!(error = %e, "Simulated session configuration failed");
            return spawn("session-configure", move || callback(Err(e)));
        }

        let session = Arc::new(SessionInner {
            outputs,
            faults: Arc::clone(&self.inner.faults),
            state: Mutex::new(SessionState::default()),
            frame_loop: Mutex::new(None),
        });
        lock(&self.inner.state).session = Some(Arc::clone(&session));
        debug!(id = %self.inner.id, streams = session.outputs.len(), "Simulated session configured");
        let session: Arc<dyn CaptureSession> = Arc::new(SimulatedCaptureSession { inner: session });
        spawn("session-configure", move || callback(Ok(session)))
    }

    fn close(&self) {
        let delay = self.inner.faults.release_delay();
        if !delay.is_zero() {
            warn!(delay_ms = delay.as_millis() as u64, "Simulated close is slow");
            std::thread::sleep(delay);
        }
        self.inner.shut_down();
        info!(id = %self.inner.id, "Simulated session device closed");
    }
}

/// What the model saw of the previous request
#[derive(Default)]
struct ThreeA {
    ae: Option<AeState>,
    af: Option<AfState>,
    awb: Option<AwbState>,
    ae_frames: u32,
    af_frames: u32,
    awb_frames: u32,
    last_af_mode: Option<AfMode>,
    last_af_trigger: Option<Trigger>,
    last_precapture_trigger: Option<Trigger>,
}

fn fresh(trigger: Option<Trigger>, last: Option<Trigger>, wanted: Trigger) -> bool {
    trigger == Some(wanted) && last != Some(wanted)
}

impl ThreeA {
    fn step(&mut self, request: &CaptureRequest, frame_number: u64, focus_held: bool) -> CaptureResult {
        self.step_ae(request);
        self.step_af(request, focus_held);
        self.step_awb(request);
        self.last_af_mode = request.af_mode;
        self.last_af_trigger = request.af_trigger;
        self.last_precapture_trigger = request.ae_precapture_trigger;
        CaptureResult {
            frame_number,
            ae_state: self.ae,
            af_state: self.af,
            awb_state: self.awb,
            af_mode: request.af_mode,
            af_trigger: request.af_trigger,
            ae_precapture_trigger: request.ae_precapture_trigger,
        }
    }

    fn step_ae(&mut self, request: &CaptureRequest) {
        let trigger = request.ae_precapture_trigger;
        if !request.ae_mode.is_some_and(|m| m.is_on()) {
            self.ae = Some(AeState::Inactive);
            return;
        }
        if request.ae_lock {
            self.ae = Some(AeState::Locked);
            return;
        }
        if fresh(trigger, self.last_precapture_trigger, Trigger::Start) {
            self.ae = Some(AeState::Precapture);
            self.ae_frames = SETTLE_FRAMES;
            return;
        }
        if fresh(trigger, self.last_precapture_trigger, Trigger::Cancel) {
            self.ae = Some(AeState::Converged);
            return;
        }
        self.ae = match self.ae {
            None | Some(AeState::Inactive) | Some(AeState::Locked) => {
                self.ae_frames = SETTLE_FRAMES;
                Some(AeState::Searching)
            }
            Some(AeState::Searching) | Some(AeState::Precapture) => {
                self.ae_frames = self.ae_frames.saturating_sub(1);
                if self.ae_frames == 0 { Some(AeState::Converged) } else { self.ae }
            }
            other => other,
        };
    }

    fn step_af(&mut self, request: &CaptureRequest, focus_held: bool) {
        let trigger = request.af_trigger;
        let mode = request.af_mode;
        if mode != self.last_af_mode {
            self.af = Some(AfState::Inactive);
        }
        match mode {
            None | Some(AfMode::Off) => self.af = Some(AfState::Inactive),
            Some(AfMode::Auto) | Some(AfMode::Macro) => {
                if fresh(trigger, self.last_af_trigger, Trigger::Start) {
                    self.af = Some(AfState::ActiveScan);
                    self.af_frames = SETTLE_FRAMES;
                } else if fresh(trigger, self.last_af_trigger, Trigger::Cancel) {
                    self.af = Some(AfState::Inactive);
                } else if self.af == Some(AfState::ActiveScan) && !focus_held {
                    self.af_frames = self.af_frames.saturating_sub(1);
                    if self.af_frames == 0 {
                        self.af = Some(AfState::FocusedLocked);
                    }
                }
            }
            Some(AfMode::ContinuousPicture) | Some(AfMode::ContinuousVideo) => {
                if fresh(trigger, self.last_af_trigger, Trigger::Start) {
                    self.af = Some(AfState::FocusedLocked);
                } else if fresh(trigger, self.last_af_trigger, Trigger::Cancel) {
                    self.af = Some(AfState::Inactive);
                } else {
                    self.af = match self.af {
                        None | Some(AfState::Inactive) => {
                            self.af_frames = SETTLE_FRAMES;
                            Some(AfState::PassiveScan)
                        }
                        Some(AfState::PassiveScan) => {
                            self.af_frames = self.af_frames.saturating_sub(1);
                            if self.af_frames == 0 { Some(AfState::PassiveFocused) } else { self.af }
                        }
                        other => other,
                    };
                }
            }
        }
    }

    fn step_awb(&mut self, request: &CaptureRequest) {
        if request.awb_mode != Some(AwbMode::Auto) {
            self.awb = Some(AwbState::Inactive);
            return;
        }
        if request.awb_lock {
            self.awb = Some(AwbState::Locked);
            return;
        }
        self.awb = match self.awb {
            None | Some(AwbState::Inactive) | Some(AwbState::Locked) => {
                self.awb_frames = SETTLE_FRAMES;
                Some(AwbState::Searching)
            }
            Some(AwbState::Searching) => {
                self.awb_frames = self.awb_frames.saturating_sub(1);
                if self.awb_frames == 0 { Some(AwbState::Converged) } else { self.awb }
            }
            other => other,
        };
    }
}

type Submitted = (CaptureRequest, Option<Arc<dyn CaptureListener>>);

#[derive(Default)]
struct SessionState {
    closed: bool,
    repeating: Option<(CaptureRequest, Arc<dyn CaptureListener>)>,
    single: VecDeque<Submitted>,
    frame_number: u64,
    frame_counter: u8,
    three_a: ThreeA,
}

struct SessionInner {
    outputs: Vec<StreamConfig>,
    faults: Arc<FaultInjector>,
    state: Mutex<SessionState>,
    frame_loop: Mutex<Option<CaptureLoopController>>,
}

/// Everything one frame delivers, collected under the lock
struct FrameWork {
    request: CaptureRequest,
    listener: Option<Arc<dyn CaptureListener>>,
    result: CaptureResult,
    images: Vec<(StreamConfig, Image)>,
    failed: bool,
}

impl SessionInner {
    fn check_targets(&self, request: &CaptureRequest) -> Result<(), SessionError> {
        if lock(&self.state).closed {
            return Err(SessionError::Runtime("session closed".to_string()));
        }
        match request
            .targets
            .iter()
            .find(|role| !self.outputs.iter().any(|o| o.role == **role))
        {
            Some(role) => Err(SessionError::Runtime(format!("{:?} is not an output of this session", role))),
            None if request.targets.is_empty() => Err(SessionError::Runtime("request has no targets".to_string())),
            None => Ok(()),
        }
    }

    fn next_frame(&self) -> Option<FrameWork> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }
        let (request, listener, single) = match state.single.pop_front() {
            Some((request, listener)) => (request, listener, true),
            None => {
                let (request, listener) = state.repeating.as_ref()?;
                (request.clone(), Some(Arc::clone(listener)), false)
            }
        };
        state.frame_number += 1;
        state.frame_counter = state.frame_counter.wrapping_add(1);
        let frame_number = state.frame_number;
        let fill = state.frame_counter;
        let result = state.three_a.step(&request, frame_number, self.faults.focus_held());
        let failed = single && request.has_target(StreamRole::Picture) && self.faults.take_picture();

        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let mut images = Vec::new();
        for output in &self.outputs {
            if !request.has_target(output.role) || output.on_image.is_none() || failed {
                continue;
            }
            let data = match output.format {
                StreamFormat::Picture(format) => encode_placeholder(format, output.size),
                StreamFormat::Frames(format) => {
                    let bytes = output.size.area() as usize * format.bits_per_pixel() as usize / 8;
                    vec![fill; bytes]
                }
                StreamFormat::Surface(_) | StreamFormat::Encoder => continue,
            };
            images.push((
                output.clone(),
                Image {
                    data,
                    size: output.size,
                    timestamp_ms,
                },
            ));
        }
        Some(FrameWork {
            request,
            listener,
            result,
            images,
            failed,
        })
    }

    fn ensure_loop(self: &Arc<Self>) {
        let mut frame_loop = lock(&self.frame_loop);
        if frame_loop.as_ref().is_some_and(|l| l.is_running()) {
            return;
        }
        let weak = Arc::downgrade(self);
        *frame_loop = Some(CaptureLoopController::start_periodic(
            "session-frames",
            timing::SIMULATED_FRAME_INTERVAL,
            move || {
                let Some(inner) = weak.upgrade() else {
                    return LoopAction::Stop;
                };
                if lock(&inner.state).closed {
                    return LoopAction::Stop;
                }
                if let Some(work) = inner.next_frame() {
                    deliver(work);
                }
                LoopAction::Continue
            },
        ));
    }

    fn close(&self) {
        {
            let mut state = lock(&self.state);
            state.closed = true;
            state.repeating = None;
            state.single.clear();
        }
        let frame_loop = lock(&self.frame_loop).take();
        if let Some(mut frame_loop) = frame_loop {
            frame_loop.stop();
        }
    }
}

fn deliver(work: FrameWork) {
    if let Some(listener) = &work.listener {
        listener.on_capture_started(&work.request);
        if work.failed {
            listener.on_capture_failed(&work.request);
            return;
        }
        listener.on_capture_completed(&work.request, &work.result);
    }
    for (output, image) in work.images {
        if let Some(on_image) = &output.on_image {
            on_image(image);
        }
    }
}

/// Capture session of a simulated device
pub struct SimulatedCaptureSession {
    inner: Arc<SessionInner>,
}

impl CaptureSession for SimulatedCaptureSession {
    fn set_repeating_request(
        &self,
        request: &CaptureRequest,
        listener: Arc<dyn CaptureListener>,
    ) -> Result<(), SessionError> {
        self.inner.check_targets(request)?;
        if self.inner.faults.take_start_preview() {
            return Err(SessionError::Runtime("repeating request rejected".to_string()));
        }
        lock(&self.inner.state).repeating = Some((request.clone(), listener));
        self.inner.ensure_loop();
        Ok(())
    }

    fn capture(
        &self,
        request: &CaptureRequest,
        listener: Option<Arc<dyn CaptureListener>>,
    ) -> Result<(), SessionError> {
        self.inner.check_targets(request)?;
        lock(&self.inner.state).single.push_back((request.clone(), listener));
        self.inner.ensure_loop();
        Ok(())
    }

    fn stop_repeating(&self) -> Result<(), SessionError> {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return Err(SessionError::Runtime("session closed".to_string()));
        }
        state.repeating = None;
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Results(Mutex<mpsc::Sender<CaptureResult>>);

    impl CaptureListener for Results {
        fn on_capture_completed(&self, _request: &CaptureRequest, result: &CaptureResult) {
            let _ = lock(&self.0).send(result.clone());
        }
    }

    fn open(api: &SimulatedSessionApi, id: &str) -> Result<Arc<dyn SessionDevice>, SessionError> {
        let (tx, rx) = mpsc::channel();
        api.open(
            id,
            Box::new(move |r: Result<Arc<dyn SessionDevice>, SessionError>| {
                let _ = tx.send(r);
            }),
            Arc::new(|_: SessionError| {}),
        )?;
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn configure(
        device: &Arc<dyn SessionDevice>,
        outputs: Vec<StreamConfig>,
    ) -> Result<Arc<dyn CaptureSession>, SessionError> {
        let (tx, rx) = mpsc::channel();
        device.create_session(
            outputs,
            Box::new(move |r: Result<Arc<dyn CaptureSession>, SessionError>| {
                let _ = tx.send(r);
            }),
        )?;
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn frames_output(size: Size) -> StreamConfig {
        StreamConfig {
            role: StreamRole::FrameProcessing,
            format: StreamFormat::Frames(FrameFormat::Yuv420),
            size,
            capacity: 3,
            on_image: None,
        }
    }

    #[test]
    fn test_open_fault_reports_in_use() {
        let api = SimulatedSessionApi::new();
        assert_eq!(api.camera_ids().unwrap(), vec!["0".to_string(), "1".to_string()]);
        assert!(api.characteristics("7").is_err());
        api.faults().fail_next_open();
        assert!(matches!(open(&api, "0"), Err(SessionError::InUse)));
        assert!(open(&api, "0").is_ok());
    }

    #[test]
    fn test_configure_rejects_unknown_sizes() {
        let api = SimulatedSessionApi::new();
        let device = open(&api, "0").unwrap();
        let err = configure(&device, vec![frames_output(Size::new(123, 45))]).err();
        assert!(matches!(err, Some(SessionError::ConfigureFailed(_))));
        assert!(configure(&device, vec![frames_output(Size::new(640, 480))]).is_ok());
    }

    #[test]
    fn test_focus_trigger_locks() {
        let api = SimulatedSessionApi::new();
        let device = open(&api, "0").unwrap();
        let session = configure(&device, vec![frames_output(Size::new(640, 480))]).unwrap();
        let (tx, rx) = mpsc::channel();
        let listener: Arc<dyn CaptureListener> = Arc::new(Results(Mutex::new(tx)));

        let mut request = device.create_request(Template::Preview).unwrap();
        request.add_target(StreamRole::FrameProcessing);
        request.af_mode = Some(AfMode::Auto);
        request.af_trigger = Some(Trigger::Start);
        session.set_repeating_request(&request, Arc::clone(&listener)).unwrap();

        let locked = (0..20)
            .filter_map(|_| rx.recv_timeout(Duration::from_secs(1)).ok())
            .any(|r| r.af_state == Some(AfState::FocusedLocked));
        assert!(locked);
        session.close();
        assert!(session.set_repeating_request(&request, listener).is_err());
    }

    #[test]
    fn test_close_rejects_requests() {
        let api = SimulatedSessionApi::new();
        let device = open(&api, "1").unwrap();
        assert_eq!(device.create_request(Template::Preview).unwrap().af_mode, Some(AfMode::Off));
        device.close();
        assert!(device.create_request(Template::Preview).is_err());
    }

    #[test]
    fn test_disconnect_reaches_error_callback() {
        let api = SimulatedSessionApi::new();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let (open_tx, open_rx) = mpsc::channel();
        api.open(
            "0",
            Box::new(move |r: Result<Arc<dyn SessionDevice>, SessionError>| {
                let _ = open_tx.send(r);
            }),
            Arc::new(move |e: SessionError| {
                let _ = lock(&tx).send(e);
            }),
        )
        .unwrap();
        // Kept alive so the device stays registered
        let device = open_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(device.is_ok());
        api.disconnect();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(SessionError::Disconnected));
    }
}
