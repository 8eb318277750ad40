// SPDX-License-Identifier: GPL-3.0-only

//! Simulated legacy hardware
//!
//! A back camera with the full feature set and a plain front camera.
//! Preview frames are pushed from a capture loop thread into queued callback
//! buffers; focus and pictures complete on short-lived threads.

use super::device::{
    AutoFocusCallback, CAMERA_FACING_BACK, CAMERA_FACING_FRONT, ErrorCallback, LegacyCamera, LegacyCameraApi,
    LegacyCameraInfo, LegacyError, LegacyParameters, PictureCallback, PreviewCallback, ShutterCallback,
};
use super::mapper::*;
use crate::backends::camera::faults::FaultInjector;
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::constants::timing;
use crate::engine::controls::PictureFormat;
use crate::pipelines::photo::encode_placeholder;
use crate::preview::SurfaceId;
use crate::size::Size;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const FOCUS_DURATION: Duration = Duration::from_millis(100);
const PICTURE_DURATION: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn back_parameters() -> LegacyParameters {
    LegacyParameters {
        supported_preview_sizes: vec![
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(960, 720),
            Size::new(640, 480),
            Size::new(320, 240),
            Size::new(176, 144),
        ],
        supported_picture_sizes: vec![
            Size::new(4032, 3024),
            Size::new(4000, 2250),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ],
        supported_video_sizes: Some(vec![
            Size::new(3840, 2160),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ]),
        max_video_size: Some(Size::new(1920, 1080)),
        supported_flash_modes: Some(strings(&[FLASH_MODE_OFF, FLASH_MODE_ON, FLASH_MODE_AUTO, FLASH_MODE_TORCH])),
        flash_mode: Some(FLASH_MODE_OFF.to_string()),
        supported_white_balance: Some(strings(&[
            WHITE_BALANCE_AUTO,
            WHITE_BALANCE_INCANDESCENT,
            WHITE_BALANCE_DAYLIGHT,
            WHITE_BALANCE_CLOUDY_DAYLIGHT,
        ])),
        white_balance: Some(WHITE_BALANCE_AUTO.to_string()),
        supported_scene_modes: Some(strings(&[SCENE_MODE_AUTO, SCENE_MODE_HDR])),
        scene_mode: Some(SCENE_MODE_AUTO.to_string()),
        supported_focus_modes: strings(&[
            FOCUS_MODE_AUTO,
            FOCUS_MODE_CONTINUOUS_PICTURE,
            FOCUS_MODE_CONTINUOUS_VIDEO,
            FOCUS_MODE_FIXED,
        ]),
        focus_mode: Some(FOCUS_MODE_CONTINUOUS_PICTURE.to_string()),
        zoom_supported: true,
        max_zoom: 99,
        min_exposure_compensation: -12,
        max_exposure_compensation: 12,
        exposure_compensation_step: 1.0 / 6.0,
        supported_preview_fps_ranges: vec![[15000, 30000], [30000, 30000], [7000, 60000]],
        max_num_focus_areas: 1,
        max_num_metering_areas: 1,
        ..Default::default()
    }
}

fn front_parameters() -> LegacyParameters {
    LegacyParameters {
        supported_preview_sizes: vec![Size::new(1280, 720), Size::new(640, 480), Size::new(320, 240)],
        supported_picture_sizes: vec![Size::new(2592, 1944), Size::new(1280, 720), Size::new(640, 480)],
        supported_video_sizes: None,
        max_video_size: Some(Size::new(1280, 720)),
        supported_white_balance: Some(strings(&[WHITE_BALANCE_AUTO])),
        white_balance: Some(WHITE_BALANCE_AUTO.to_string()),
        supported_focus_modes: strings(&[FOCUS_MODE_FIXED]),
        focus_mode: Some(FOCUS_MODE_FIXED.to_string()),
        exposure_compensation_step: 0.5,
        supported_preview_fps_ranges: vec![[15000, 30000]],
        ..Default::default()
    }
}

struct SimulatedCameraSpec {
    info: LegacyCameraInfo,
    params: LegacyParameters,
}

/// Legacy API over two simulated cameras
pub struct SimulatedLegacyApi {
    cameras: Vec<SimulatedCameraSpec>,
    faults: Arc<FaultInjector>,
    opened: Mutex<Vec<Weak<CameraInner>>>,
}

impl Default for SimulatedLegacyApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLegacyApi {
    pub fn new() -> Self {
        let cameras = vec![
            SimulatedCameraSpec {
                info: LegacyCameraInfo {
                    facing: CAMERA_FACING_BACK,
                    orientation: 90,
                    can_disable_shutter_sound: true,
                    name: "Simulated back camera".to_string(),
                },
                params: back_parameters(),
            },
            SimulatedCameraSpec {
                info: LegacyCameraInfo {
                    facing: CAMERA_FACING_FRONT,
                    orientation: 270,
                    can_disable_shutter_sound: false,
                    name: "Simulated front camera".to_string(),
                },
                params: front_parameters(),
            },
        ];
        Self {
            cameras,
            faults: Arc::new(FaultInjector::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Fire `error` on every open camera, as the media server would
    pub fn raise_error(&self, error: LegacyError) {
        let opened: Vec<Arc<CameraInner>> = lock(&self.opened).iter().filter_map(Weak::upgrade).collect();
        for camera in opened {
            let callback = lock(&camera.state).error_callback.clone();
            if let Some(callback) = callback {
                warn!(error = %error, "Simulated legacy camera error");
                callback(error.clone());
            }
        }
    }

    /// Simulate the camera service dying
    pub fn disconnect(&self) {
        self.raise_error(LegacyError::ServerDied);
    }
}

impl LegacyCameraApi for SimulatedLegacyApi {
    fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    fn camera_info(&self, index: usize) -> Option<LegacyCameraInfo> {
        self.cameras.get(index).map(|c| c.info.clone())
    }

    fn open(&self, index: usize) -> Result<Arc<dyn LegacyCamera>, LegacyError> {
        if self.faults.take_open() {
            return Err(LegacyError::Connect("camera in use by another client".to_string()));
        }
        let spec = self
            .cameras
            .get(index)
            .ok_or_else(|| LegacyError::Connect(format!("no camera at index {}", index)))?;
        let inner = Arc::new(CameraInner {
            info: spec.info.clone(),
            faults: Arc::clone(&self.faults),
            state: Mutex::new(DeviceState {
                params: spec.params.clone(),
                ..Default::default()
            }),
            preview_loop: Mutex::new(None),
        });
        let mut opened = lock(&self.opened);
        opened.retain(|w| w.strong_count() > 0);
        opened.push(Arc::downgrade(&inner));
        info!(index, name = %spec.info.name, "Simulated legacy camera opened");
        Ok(Arc::new(SimulatedLegacyCamera { inner }))
    }
}

#[derive(Default)]
struct DeviceState {
    params: LegacyParameters,
    released: bool,
    locked: bool,
    previewing: bool,
    target: Option<SurfaceId>,
    display_orientation: i32,
    preview_callback: Option<PreviewCallback>,
    error_callback: Option<ErrorCallback>,
    buffers: VecDeque<Vec<u8>>,
    shutter_sound: bool,
    frame_counter: u8,
}

struct CameraInner {
    info: LegacyCameraInfo,
    faults: Arc<FaultInjector>,
    state: Mutex<DeviceState>,
    preview_loop: Mutex<Option<CaptureLoopController>>,
}

impl CameraInner {
    fn state(&self) -> Result<MutexGuard<'_, DeviceState>, LegacyError> {
        let state = lock(&self.state);
        if state.released {
            return Err(LegacyError::Runtime("camera already released".to_string()));
        }
        Ok(state)
    }

    /// Fill the next queued buffer; `None` when nobody listens or no buffer is free
    fn next_frame(&self) -> Option<(PreviewCallback, Vec<u8>)> {
        let mut state = lock(&self.state);
        if !state.previewing {
            return None;
        }
        let callback = state.preview_callback.clone()?;
        let mut buffer = state.buffers.pop_front()?;
        state.frame_counter = state.frame_counter.wrapping_add(1);
        buffer.fill(state.frame_counter);
        Some((callback, buffer))
    }

    fn stop_loop(&self) {
        let preview_loop = lock(&self.preview_loop).take();
        if let Some(mut preview_loop) = preview_loop {
            preview_loop.stop();
        }
    }
}

/// One open simulated camera
pub struct SimulatedLegacyCamera {
    inner: Arc<CameraInner>,
}

impl SimulatedLegacyCamera {
    fn start_loop(&self) {
        let weak = Arc::downgrade(&self.inner);
        let controller =
            CaptureLoopController::start_periodic("legacy-preview", timing::SIMULATED_FRAME_INTERVAL, move || {
                let Some(inner) = weak.upgrade() else {
                    return LoopAction::Stop;
                };
                if let Some((callback, buffer)) = inner.next_frame() {
                    callback(buffer);
                }
                LoopAction::Continue
            });
        *lock(&self.inner.preview_loop) = Some(controller);
    }
}

fn check_size(size: Option<Size>, supported: &[Size], what: &str) -> Result<(), LegacyError> {
    match size {
        Some(size) if !supported.contains(&size) => {
            Err(LegacyError::Runtime(format!("unsupported {} size {}", what, size)))
        }
        _ => Ok(()),
    }
}

impl LegacyCamera for SimulatedLegacyCamera {
    fn parameters(&self) -> Result<LegacyParameters, LegacyError> {
        Ok(self.inner.state()?.params.clone())
    }

    fn set_parameters(&self, params: &LegacyParameters) -> Result<(), LegacyError> {
        let mut state = self.inner.state()?;
        check_size(params.preview_size, &state.params.supported_preview_sizes, "preview")?;
        check_size(params.picture_size, &state.params.supported_picture_sizes, "picture")?;
        if params.zoom < 0 || params.zoom > state.params.max_zoom.max(0) {
            return Err(LegacyError::Runtime(format!("zoom {} out of range", params.zoom)));
        }
        if params.exposure_compensation < state.params.min_exposure_compensation
            || params.exposure_compensation > state.params.max_exposure_compensation
        {
            return Err(LegacyError::Runtime(format!(
                "exposure compensation {} out of range",
                params.exposure_compensation
            )));
        }
        if let Some(range) = params.preview_fps_range
            && !state.params.supported_preview_fps_ranges.contains(&range)
        {
            return Err(LegacyError::Runtime(format!("unsupported fps range {:?}", range)));
        }
        state.params = params.clone();
        Ok(())
    }

    fn set_display_orientation(&self, degrees: i32) -> Result<(), LegacyError> {
        let mut state = self.inner.state()?;
        if state.previewing {
            return Err(LegacyError::Runtime("display orientation changed while previewing".to_string()));
        }
        state.display_orientation = degrees;
        Ok(())
    }

    fn set_preview_target(&self, surface: Option<SurfaceId>) -> Result<(), LegacyError> {
        if surface.is_some() && self.inner.faults.take_bind() {
            return Err(LegacyError::Runtime("preview target rejected".to_string()));
        }
        self.inner.state()?.target = surface;
        Ok(())
    }

    fn set_preview_callback(&self, callback: Option<PreviewCallback>) {
        let mut state = lock(&self.inner.state);
        if callback.is_none() {
            state.buffers.clear();
        }
        state.preview_callback = callback;
    }

    fn add_callback_buffer(&self, buffer: Vec<u8>) {
        let mut state = lock(&self.inner.state);
        if !state.released {
            state.buffers.push_back(buffer);
        }
    }

    fn start_preview(&self) -> Result<(), LegacyError> {
        {
            let mut state = self.inner.state()?;
            if self.inner.faults.take_start_preview() {
                return Err(LegacyError::Runtime("preview failed to start".to_string()));
            }
            if state.target.is_none() {
                return Err(LegacyError::Runtime("no preview target".to_string()));
            }
            if state.previewing {
                return Ok(());
            }
            state.previewing = true;
        }
        debug!(camera = %self.inner.info.name, "Simulated preview started");
        self.start_loop();
        Ok(())
    }

    fn stop_preview(&self) -> Result<(), LegacyError> {
        self.inner.state()?.previewing = false;
        self.inner.stop_loop();
        Ok(())
    }

    fn auto_focus(&self, callback: AutoFocusCallback) -> Result<(), LegacyError> {
        let state = self.inner.state()?;
        if state.params.focus_mode.as_deref() != Some(FOCUS_MODE_AUTO) {
            return Err(LegacyError::Runtime("focus mode is not auto".to_string()));
        }
        drop(state);
        std::thread::Builder::new()
            .name("legacy-autofocus".to_string())
            .spawn(move || {
                std::thread::sleep(FOCUS_DURATION);
                callback(true);
            })
            .map(|_| ())
            .map_err(|e| LegacyError::Runtime(e.to_string()))
    }

    fn cancel_auto_focus(&self) {
        debug!("Simulated auto focus cancelled");
    }

    fn take_picture(&self, shutter: ShutterCallback, jpeg: PictureCallback) -> Result<(), LegacyError> {
        let size = {
            let mut state = self.inner.state()?;
            if !state.previewing {
                return Err(LegacyError::Runtime("take_picture called without preview".to_string()));
            }
            state.previewing = false;
            state.params.picture_size.unwrap_or(Size::new(640, 480))
        };
        self.inner.stop_loop();
        let fail = self.inner.faults.take_picture();
        std::thread::Builder::new()
            .name("legacy-picture".to_string())
            .spawn(move || {
                shutter();
                std::thread::sleep(PICTURE_DURATION);
                if fail {
                    jpeg(Err(LegacyError::Runtime("capture failed".to_string())));
                } else {
                    jpeg(Ok(encode_placeholder(PictureFormat::Jpeg, size)));
                }
            })
            .map(|_| ())
            .map_err(|e| LegacyError::Runtime(e.to_string()))
    }

    fn enable_shutter_sound(&self, enabled: bool) -> Result<bool, LegacyError> {
        let mut state = self.inner.state()?;
        if !self.inner.info.can_disable_shutter_sound {
            return Ok(false);
        }
        state.shutter_sound = enabled;
        Ok(true)
    }

    fn lock(&self) -> Result<(), LegacyError> {
        self.inner.state()?.locked = true;
        Ok(())
    }

    fn unlock(&self) -> Result<(), LegacyError> {
        self.inner.state()?.locked = false;
        Ok(())
    }

    fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        lock(&self.inner.state).error_callback = callback;
    }

    fn release(&self) {
        let delay = self.inner.faults.release_delay();
        if !delay.is_zero() {
            warn!(delay_ms = delay.as_millis() as u64, "Simulated release is slow");
            std::thread::sleep(delay);
        }
        self.inner.stop_loop();
        let mut state = lock(&self.inner.state);
        state.released = true;
        state.previewing = false;
        state.preview_callback = None;
        state.error_callback = None;
        state.buffers.clear();
        info!(camera = %self.inner.info.name, "Simulated legacy camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_open_and_info() {
        let api = SimulatedLegacyApi::new();
        assert_eq!(api.camera_count(), 2);
        assert_eq!(api.camera_info(1).map(|i| i.facing), Some(CAMERA_FACING_FRONT));
        assert!(api.open(5).is_err());
        api.faults().fail_next_open();
        assert!(matches!(api.open(0), Err(LegacyError::Connect(_))));
        assert!(api.open(0).is_ok());
    }

    #[test]
    fn test_parameters_are_validated() {
        let api = SimulatedLegacyApi::new();
        let camera = api.open(0).unwrap();
        let mut params = camera.parameters().unwrap();
        params.preview_size = Some(Size::new(123, 45));
        assert!(camera.set_parameters(&params).is_err());
        params.preview_size = Some(Size::new(1280, 720));
        params.zoom = 50;
        camera.set_parameters(&params).unwrap();
        assert_eq!(camera.parameters().unwrap().zoom, 50);
    }

    #[test]
    fn test_preview_fills_queued_buffers() {
        let api = SimulatedLegacyApi::new();
        let camera = api.open(0).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        camera.set_preview_callback(Some(Arc::new(move |buffer: Vec<u8>| {
            let _ = lock(&tx).send(buffer.len());
        })));
        camera.add_callback_buffer(vec![0; 16]);
        assert!(camera.start_preview().is_err(), "needs a target");
        camera.set_preview_target(Some(1)).unwrap();
        camera.start_preview().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(16));
        camera.stop_preview().unwrap();
    }

    #[test]
    fn test_release_invalidates_camera() {
        let api = SimulatedLegacyApi::new();
        let camera = api.open(0).unwrap();
        camera.release();
        assert!(camera.parameters().is_err());
    }

    #[test]
    fn test_disconnect_reaches_error_callback() {
        let api = SimulatedLegacyApi::new();
        let camera = api.open(0).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        camera.set_error_callback(Some(Arc::new(move |e: LegacyError| {
            let _ = lock(&tx).send(e);
        })));
        api.disconnect();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(LegacyError::ServerDied));
    }
}
