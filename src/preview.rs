// SPDX-License-Identifier: GPL-3.0-only

//! Preview surface provider
//!
//! The surface the preview stream is drawn onto belongs to the embedding
//! application. The engine only needs its size, a handle to target, and a
//! way to tell it the stream size and rotation.

use crate::size::Size;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Opaque handle to a render target
pub type SurfaceId = u64;

pub trait PreviewSurface: Send + Sync {
    /// Current surface size in the `View` reference, `None` until available
    fn surface_size(&self) -> Option<Size>;

    /// Handle the camera should render into, `None` until available
    fn surface_id(&self) -> Option<SurfaceId>;

    fn has_surface(&self) -> bool {
        self.surface_id().is_some()
    }

    /// Stream size in the `View` reference, used to crop or letterbox
    fn set_stream_size(&self, size: Size);

    /// Rotation the surface must apply when drawing, in clockwise degrees
    fn set_draw_rotation(&self, degrees: i32);

    /// Whether snapshots can be grabbed from what this surface shows
    fn supports_snapshots(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct PreviewState {
    surface: Option<(SurfaceId, Size)>,
    stream_size: Option<Size>,
    draw_rotation: i32,
}

/// In-memory surface for headless use and tests
#[derive(Debug, Default)]
pub struct SimulatedPreview {
    state: Mutex<PreviewState>,
    next_id: AtomicU64,
}

impl SimulatedPreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface already available with `size`
    pub fn with_surface(size: Size) -> Self {
        let preview = Self::new();
        preview.make_available(size);
        preview
    }

    fn state(&self) -> MutexGuard<'_, PreviewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or resize the surface
    pub fn make_available(&self, size: Size) -> SurfaceId {
        let mut state = self.state();
        let id = match state.surface {
            Some((id, _)) => id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        state.surface = Some((id, size));
        debug!(surface = id, size = %size, "Preview surface available");
        id
    }

    pub fn destroy(&self) {
        let mut state = self.state();
        state.surface = None;
        state.stream_size = None;
    }

    pub fn stream_size(&self) -> Option<Size> {
        self.state().stream_size
    }

    pub fn draw_rotation(&self) -> i32 {
        self.state().draw_rotation
    }
}

impl PreviewSurface for SimulatedPreview {
    fn surface_size(&self) -> Option<Size> {
        self.state().surface.map(|(_, size)| size)
    }

    fn surface_id(&self) -> Option<SurfaceId> {
        self.state().surface.map(|(id, _)| id)
    }

    fn set_stream_size(&self, size: Size) {
        self.state().stream_size = Some(size);
    }

    fn set_draw_rotation(&self, degrees: i32) {
        self.state().draw_rotation = degrees;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_lifecycle() {
        let preview = SimulatedPreview::new();
        assert!(!preview.has_surface());
        let id = preview.make_available(Size::new(1080, 1920));
        assert_eq!(preview.surface_id(), Some(id));
        assert_eq!(preview.make_available(Size::new(720, 1280)), id);
        assert_eq!(preview.surface_size(), Some(Size::new(720, 1280)));
        preview.set_stream_size(Size::new(720, 1280));
        preview.destroy();
        assert!(!preview.has_surface());
        assert_eq!(preview.stream_size(), None);
    }
}
