// SPDX-License-Identifier: MPL-2.0

//! Camera backend abstraction
//!
//! The engine drives the hardware through the [`CameraBackend`] trait. Two
//! implementations exist, one per hardware API family:
//!
//! ```text
//! ┌─────────────────────┐
//! │    CameraEngine     │  ← Orchestration, parameters, sizes
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraBackend Trait│  ← Lifecycle hooks, capture, focus
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐  ┌─────────┐
//!   │Legacy│  │ Session │  ← Concrete implementations
//!   └──────┘  └─────────┘
//! ```
//!
//! Hooks run inside orchestrator jobs, one at a time. They may schedule new
//! jobs but must never wait for one.

pub mod faults;
pub mod frame_loop;
pub mod legacy;
pub mod session;
pub mod types;

pub use types::*;

use crate::engine::EngineContext;
use crate::engine::callback::{PictureResult, VideoResult};
use crate::engine::controls::{Facing, PointF};
use crate::engine::options::CameraOptions;
use crate::engine::params::ParameterChange;
use crate::errors::EngineResult;
use crate::size::{AspectRatio, Size};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Complete camera backend trait
pub trait CameraBackend: Send {
    // ===== Metadata =====

    /// Get the backend type identifier
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    // ===== Enumeration =====

    /// Enumerate available cameras on this backend
    fn enumerate_cameras(&self) -> Vec<CameraDevice>;

    /// Pick the camera for `facing` and record its sensor offset
    ///
    /// Returns false when no camera faces that way.
    fn collect_camera_info(&mut self, facing: Facing) -> bool;

    // ===== Lifecycle =====

    /// Open the selected camera and report what it can do
    fn on_start_engine(&mut self) -> BoxFuture<'_, EngineResult<CameraOptions>>;

    /// Compute sizes and attach the preview surface
    fn on_start_bind(&mut self) -> BoxFuture<'_, EngineResult<()>>;

    fn on_start_preview(&mut self) -> BoxFuture<'_, EngineResult<()>>;

    fn on_stop_preview(&mut self) -> BoxFuture<'_, EngineResult<()>>;

    fn on_stop_bind(&mut self) -> BoxFuture<'_, EngineResult<()>>;

    /// Release the camera; must succeed even if the device is gone
    fn on_stop_engine(&mut self) -> BoxFuture<'_, EngineResult<()>>;

    // ===== Sizes =====

    /// Preview stream sizes, in the `Sensor` reference
    fn preview_stream_available_sizes(&self) -> Vec<Size>;

    /// Frame processing sizes, in the `Sensor` reference
    fn frame_processing_available_sizes(&self) -> Vec<Size>;

    // ===== Parameters =====

    /// Push a resolved parameter to the hardware
    ///
    /// Returns false when the hardware refused it without failing.
    fn apply_parameter(&mut self, change: ParameterChange) -> BoxFuture<'_, EngineResult<bool>>;

    // ===== Capture =====

    fn take_picture(&mut self, stub: PictureResult, do_metering: bool) -> BoxFuture<'_, EngineResult<()>>;

    fn take_picture_snapshot(
        &mut self,
        stub: PictureResult,
        ratio: AspectRatio,
        do_metering: bool,
    ) -> BoxFuture<'_, EngineResult<()>>;

    fn take_video(&mut self, stub: VideoResult) -> BoxFuture<'_, EngineResult<()>>;

    fn take_video_snapshot(&mut self, stub: VideoResult, ratio: AspectRatio) -> BoxFuture<'_, EngineResult<()>>;

    /// Restore the device after a recording ended
    fn on_video_result(&mut self, success: bool) -> BoxFuture<'_, EngineResult<()>>;

    // ===== Focus =====

    /// Meter around `point`, given in preview surface pixels
    fn start_auto_focus(&mut self, point: PointF) -> BoxFuture<'_, EngineResult<()>>;
}

/// Hardware API a backend is built on
#[derive(Clone)]
pub enum CameraHardware {
    Legacy(Arc<dyn legacy::LegacyCameraApi>),
    Session(Arc<dyn session::SessionCameraApi>),
}

impl CameraHardware {
    /// Simulated hardware of the given kind with a back and a front camera
    pub fn simulated(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Legacy => CameraHardware::Legacy(Arc::new(legacy::SimulatedLegacyApi::new())),
            BackendKind::Session => CameraHardware::Session(Arc::new(session::SimulatedSessionApi::new())),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            CameraHardware::Legacy(_) => BackendKind::Legacy,
            CameraHardware::Session(_) => BackendKind::Session,
        }
    }
}

impl std::fmt::Debug for CameraHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CameraHardware::{}", self.kind())
    }
}

/// Get a concrete backend instance for the given hardware
pub fn get_backend_for_hardware(hardware: CameraHardware, ctx: Arc<EngineContext>) -> Box<dyn CameraBackend> {
    match hardware {
        CameraHardware::Legacy(api) => Box::new(legacy::LegacyBackend::new(api, ctx)),
        CameraHardware::Session(api) => Box::new(session::SessionBackend::new(api, ctx)),
    }
}
