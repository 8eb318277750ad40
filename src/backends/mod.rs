// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera hardware
//!
//! # Architecture
//!
//! The backend layer abstracts hardware access, providing a consistent API
//! regardless of the underlying device family:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Engine Layer                │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │               Backend Layer                 │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │   Legacy    │    │     Session      │    │
//! │  │ (sync API)  │    │ (request API)    │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Backend trait, both implementations and their simulated hardware

pub mod camera;
