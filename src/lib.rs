// SPDX-License-Identifier: MPL-2.0

//! Camera engine - hardware orchestration for camera devices
//!
//! This library drives a camera through its open, bind and preview
//! lifecycle, with picture and video capture, live parameters and
//! touch-to-focus metering, over two hardware API families.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`engine`]: Lifecycle state machine, job orchestration and parameters
//! - [`backends`]: Legacy and session camera backends with simulated hardware
//! - [`size`]: Resolution types and declarative size selection
//! - [`frame`]: Pooled preview frames for frame processors
//! - [`pipelines`]: Picture and video recorders
//! - [`preview`]: Preview surface provider
//! - [`config`]: Engine configuration handling
//!
//! # Example
//!
//! ```ignore
//! let engine = CameraEngine::builder(CameraHardware::simulated(BackendKind::Session))
//!     .preview(Arc::new(SimulatedPreview::with_surface(Size::new(1080, 1920))))
//!     .build()?;
//! engine.start().await?;
//! engine.take_picture().await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod pipelines;
pub mod preview;
pub mod size;

// Re-export commonly used types
pub use backends::camera::{BackendKind, CameraHardware};
pub use config::EngineConfig;
pub use engine::{CameraEngine, CameraState, EngineCallback, EngineEvent};
pub use errors::{CameraError, EngineError, EngineResult, ErrorReason};
pub use size::{AspectRatio, Size, SizeSelector};
