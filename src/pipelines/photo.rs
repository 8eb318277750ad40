// SPDX-License-Identifier: MPL-2.0

//! Picture snapshots and placeholder picture encoding
//!
//! Snapshots are cut from the preview stream: the largest snapshot that fits
//! the configured bounds is cropped to the requested aspect ratio.

use super::overlay::{self, Overlay, OverlayTarget};
use super::{PictureRecorder, RecorderListener, SnapshotRequest};
use crate::engine::callback::PictureResult;
use crate::engine::controls::PictureFormat;
use crate::errors::{EngineError, ErrorReason};
use crate::size::{AspectRatio, Size};
use std::sync::Arc;
use tracing::{debug, warn};

/// Centered crop of `size` with the given ratio
///
/// Returns `(x, y, cropped)`; `size` itself when the ratio already matches.
pub fn compute_crop(size: Size, ratio: AspectRatio) -> (i32, i32, Size) {
    let current = size.aspect_ratio().to_f32();
    let target = ratio.to_f32();
    if target <= 0.0 || (current - target).abs() < f32::EPSILON {
        return (0, 0, size);
    }
    if current > target {
        // Too wide, cut the sides
        let width = (size.height as f32 * target).round() as i32;
        ((size.width - width) / 2, 0, Size::new(width, size.height))
    } else {
        let height = (size.width as f32 / target).round() as i32;
        (0, (size.height - height) / 2, Size::new(size.width, height))
    }
}

/// Minimal well-formed container for `format` carrying only the dimensions
///
/// Stands in for a real encoder in simulated pipelines.
pub fn encode_placeholder(format: PictureFormat, size: Size) -> Vec<u8> {
    match format {
        PictureFormat::Jpeg => encode_jpeg(size, &[]),
        PictureFormat::Dng => {
            // Little-endian TIFF header followed by the dimensions
            let mut data = Vec::with_capacity(16);
            data.extend_from_slice(b"II*\0");
            data.extend_from_slice(&8u32.to_le_bytes());
            data.extend_from_slice(&(size.width as u32).to_le_bytes());
            data.extend_from_slice(&(size.height as u32).to_le_bytes());
            data
        }
    }
}

/// Largest payload of one JPEG segment
const MAX_SEGMENT: usize = u16::MAX as usize - 2;

/// Placeholder JPEG with each overlay layer in its own comment segments
pub fn encode_jpeg(size: Size, layers: &[Vec<u8>]) -> Vec<u8> {
    let comment = format!("{}x{}", size.width, size.height);
    let mut data = Vec::with_capacity(32 + layers.iter().map(Vec::len).sum::<usize>());
    data.extend_from_slice(&[0xFF, 0xD8]);
    for segment in std::iter::once(comment.as_bytes()).chain(layers.iter().flat_map(|l| l.chunks(MAX_SEGMENT))) {
        data.extend_from_slice(&[0xFF, 0xFE]);
        data.extend_from_slice(&((segment.len() + 2) as u16).to_be_bytes());
        data.extend_from_slice(segment);
    }
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Records a picture from the preview stream
pub struct SnapshotPictureRecorder {
    request: SnapshotRequest,
    overlay: Option<Arc<dyn Overlay>>,
}

impl SnapshotPictureRecorder {
    pub fn new(request: SnapshotRequest, overlay: Option<Arc<dyn Overlay>>) -> Self {
        Self { request, overlay }
    }
}

impl PictureRecorder for SnapshotPictureRecorder {
    fn take(&mut self, mut stub: PictureResult, listener: Arc<dyn RecorderListener>) {
        let request = self.request;
        let overlay = self.overlay.clone();
        let spawned = std::thread::Builder::new()
            .name("picture-snapshot".to_string())
            .spawn({
                let listener = Arc::clone(&listener);
                move || {
                    // Snapshots make no sound of their own
                    listener.on_picture_shutter(false);
                    let (_, _, cropped) = compute_crop(request.uncropped, request.ratio);
                    stub.size = cropped;
                    stub.rotation = request.rotation;
                    stub.format = PictureFormat::Jpeg;
                    let layers = overlay::render(
                        overlay.as_deref(),
                        OverlayTarget::PictureSnapshot,
                        cropped,
                        request.rotation,
                    );
                    stub.data = encode_jpeg(cropped, &layers);
                    debug!(
                        size = %cropped,
                        rotation = request.rotation,
                        layers = layers.len(),
                        "Picture snapshot encoded"
                    );
                    listener.on_picture_result(Ok(stub));
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn snapshot thread");
            listener.on_picture_result(Err(EngineError::camera(
                ErrorReason::PictureFailed,
                e.to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_wide_to_square() {
        let (x, y, size) = compute_crop(Size::new(1920, 1080), AspectRatio::new(1, 1));
        assert_eq!(size, Size::new(1080, 1080));
        assert_eq!((x, y), (420, 0));
    }

    #[test]
    fn test_crop_tall() {
        let (x, y, size) = compute_crop(Size::new(1080, 1920), AspectRatio::new(3, 4));
        assert_eq!(size, Size::new(1080, 1440));
        assert_eq!((x, y), (0, 240));
    }

    #[test]
    fn test_crop_matching_ratio_is_identity() {
        let size = Size::new(1280, 720);
        assert_eq!(compute_crop(size, AspectRatio::new(16, 9)), (0, 0, size));
    }

    #[test]
    fn test_placeholder_jpeg_markers() {
        let data = encode_placeholder(PictureFormat::Jpeg, Size::new(640, 480));
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
        let dng = encode_placeholder(PictureFormat::Dng, Size::new(640, 480));
        assert_eq!(&dng[..4], b"II*\0");
    }

    #[test]
    fn test_long_layers_span_segments() {
        let layer = vec![7u8; MAX_SEGMENT + 10];
        let plain = encode_jpeg(Size::new(640, 480), &[]);
        let data = encode_jpeg(Size::new(640, 480), &[layer]);
        // Two extra segments, each with a marker and a length
        assert_eq!(data.len(), plain.len() + MAX_SEGMENT + 10 + 2 * 4);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
        let second = plain.len() - 2 + 4 + MAX_SEGMENT;
        assert_eq!(&data[second..second + 4], &[0xFF, 0xFE, 0x00, 12]);
    }
}
