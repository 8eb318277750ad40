// SPDX-License-Identifier: GPL-3.0-only

//! Capability snapshot of an opened camera

use super::controls::{Facing, Flash, FrameFormat, Hdr, PictureFormat, WhiteBalance};
use crate::size::{AspectRatio, Size};
use std::collections::HashSet;

/// Frame rate range in frames per second, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpsRange {
    pub min: i32,
    pub max: i32,
}

impl FpsRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, fps: i32) -> bool {
        self.min <= fps && fps <= self.max
    }

    pub fn width(&self) -> i32 {
        self.max - self.min
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// What the opened device supports
///
/// Built by the backend when the engine starts and read-only afterwards.
/// Picture and video sizes are stored in the `View` reference.
#[derive(Debug, Clone, Default)]
pub struct CameraOptions {
    pub supported_facing: HashSet<Facing>,
    pub supported_flash: HashSet<Flash>,
    pub supported_white_balance: HashSet<WhiteBalance>,
    pub supported_hdr: HashSet<Hdr>,
    pub supported_picture_formats: HashSet<PictureFormat>,
    pub supported_frame_formats: HashSet<FrameFormat>,
    picture_sizes: Vec<Size>,
    picture_aspect_ratios: HashSet<AspectRatio>,
    video_sizes: Vec<Size>,
    video_aspect_ratios: HashSet<AspectRatio>,
    pub zoom_supported: bool,
    pub auto_focus_supported: bool,
    pub exposure_correction_supported: bool,
    pub exposure_correction_min: f32,
    pub exposure_correction_max: f32,
    pub preview_frame_rate_min: f32,
    pub preview_frame_rate_max: f32,
    pub fps_ranges: Vec<FpsRange>,
}

impl CameraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a picture size already expressed in the `View` reference
    pub fn add_picture_size(&mut self, size: Size) {
        if !self.picture_sizes.contains(&size) {
            self.picture_sizes.push(size);
            self.picture_aspect_ratios.insert(size.aspect_ratio());
        }
    }

    /// Add a video size already expressed in the `View` reference
    pub fn add_video_size(&mut self, size: Size) {
        if !self.video_sizes.contains(&size) {
            self.video_sizes.push(size);
            self.video_aspect_ratios.insert(size.aspect_ratio());
        }
    }

    /// Record the fps ranges and derive the preview frame rate bounds
    pub fn set_fps_ranges(&mut self, ranges: Vec<FpsRange>) {
        let min = ranges.iter().map(|r| r.min).min();
        let max = ranges.iter().map(|r| r.max).max();
        self.preview_frame_rate_min = min.unwrap_or(0) as f32;
        self.preview_frame_rate_max = max.unwrap_or(0) as f32;
        self.fps_ranges = ranges;
    }

    pub fn picture_sizes(&self) -> &[Size] {
        &self.picture_sizes
    }

    pub fn video_sizes(&self) -> &[Size] {
        &self.video_sizes
    }

    pub fn picture_aspect_ratios(&self) -> &HashSet<AspectRatio> {
        &self.picture_aspect_ratios
    }

    pub fn video_aspect_ratios(&self) -> &HashSet<AspectRatio> {
        &self.video_aspect_ratios
    }

    pub fn supports_flash(&self, flash: Flash) -> bool {
        self.supported_flash.contains(&flash)
    }

    pub fn supports_white_balance(&self, white_balance: WhiteBalance) -> bool {
        self.supported_white_balance.contains(&white_balance)
    }

    pub fn supports_hdr(&self, hdr: Hdr) -> bool {
        self.supported_hdr.contains(&hdr)
    }

    pub fn supports_picture_format(&self, format: PictureFormat) -> bool {
        self.supported_picture_formats.contains(&format)
    }

    pub fn supports_frame_format(&self, format: FrameFormat) -> bool {
        self.supported_frame_formats.contains(&format)
    }

    pub fn supports_facing(&self, facing: Facing) -> bool {
        self.supported_facing.contains(&facing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_track_ratios() {
        let mut options = CameraOptions::new();
        options.add_picture_size(Size::new(1920, 1080));
        options.add_picture_size(Size::new(1280, 720));
        options.add_picture_size(Size::new(1280, 720));
        options.add_picture_size(Size::new(640, 480));
        assert_eq!(options.picture_sizes().len(), 3);
        assert_eq!(options.picture_aspect_ratios().len(), 2);
        assert!(options.video_sizes().is_empty());
    }

    #[test]
    fn test_fps_bounds() {
        let mut options = CameraOptions::new();
        options.set_fps_ranges(vec![FpsRange::new(15, 30), FpsRange::new(7, 24), FpsRange::new(30, 60)]);
        assert_eq!(options.preview_frame_rate_min, 7.0);
        assert_eq!(options.preview_frame_rate_max, 60.0);
        assert!(FpsRange::new(15, 30).contains(30));
        assert_eq!(FpsRange::new(15, 30).width(), 15);
    }
}
