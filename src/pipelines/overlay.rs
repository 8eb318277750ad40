// SPDX-License-Identifier: MPL-2.0

//! Overlays composited onto snapshots
//!
//! An [`Overlay`] draws layers onto a canvas the size of the snapshot output.
//! The snapshot recorders ask it once per picture and once per video frame.

use crate::size::Size;

/// What an overlay is drawn onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayTarget {
    PictureSnapshot,
    VideoSnapshot,
}

pub trait Overlay: Send + Sync {
    fn draws_on(&self, target: OverlayTarget) -> bool;

    /// Called from recorder threads
    fn draw_on(&self, target: OverlayTarget, canvas: &mut OverlayCanvas);
}

/// Drawing surface handed to an [`Overlay`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayCanvas {
    size: Size,
    rotation: i32,
    layers: Vec<Vec<u8>>,
}

impl OverlayCanvas {
    pub fn new(size: Size, rotation: i32) -> Self {
        Self {
            size,
            rotation,
            layers: Vec::new(),
        }
    }

    /// Output size, after cropping
    pub fn size(&self) -> Size {
        self.size
    }

    /// Clockwise rotation the output is tagged with
    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    /// Add a layer on top of the ones drawn so far; empty layers are skipped
    pub fn draw(&mut self, layer: impl Into<Vec<u8>>) {
        let layer = layer.into();
        if !layer.is_empty() {
            self.layers.push(layer);
        }
    }

    pub fn layers(&self) -> &[Vec<u8>] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<Vec<u8>> {
        self.layers
    }
}

/// Draw `overlay` for `target`, or nothing when it doesn't draw there
pub fn render(overlay: Option<&dyn Overlay>, target: OverlayTarget, size: Size, rotation: i32) -> Vec<Vec<u8>> {
    match overlay {
        Some(overlay) if overlay.draws_on(target) => {
            let mut canvas = OverlayCanvas::new(size, rotation);
            overlay.draw_on(target, &mut canvas);
            canvas.into_layers()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PicturesOnly;

    impl Overlay for PicturesOnly {
        fn draws_on(&self, target: OverlayTarget) -> bool {
            target == OverlayTarget::PictureSnapshot
        }

        fn draw_on(&self, _target: OverlayTarget, canvas: &mut OverlayCanvas) {
            canvas.draw(format!("{}@{}", canvas.size(), canvas.rotation()));
            canvas.draw(Vec::new());
        }
    }

    #[test]
    fn test_render_respects_targets() {
        let overlay = PicturesOnly;
        let layers = render(Some(&overlay), OverlayTarget::PictureSnapshot, Size::new(640, 480), 90);
        assert_eq!(layers, vec![b"640x480@90".to_vec()]);
        assert!(render(Some(&overlay), OverlayTarget::VideoSnapshot, Size::new(640, 480), 90).is_empty());
        assert!(render(None, OverlayTarget::PictureSnapshot, Size::new(640, 480), 0).is_empty());
    }
}
