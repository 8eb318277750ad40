// SPDX-License-Identifier: GPL-3.0-only

//! Hardware-agnostic engine state
//!
//! Parameters, capabilities, orientation and the negotiated sizes live here,
//! behind a single lock owned by the engine context. Nothing in this module
//! awaits; callers must not hold the lock across an await point.

use super::angles::{Angles, Reference};
use super::controls::Mode;
use super::options::CameraOptions;
use super::params::ParameterSet;
use crate::config::EngineConfig;
use crate::constants::frames;
use crate::errors::{EngineError, EngineResult};
use crate::pipelines::{PictureRecorder, VideoRecorder};
use crate::size::{AspectRatio, Size, SizeSelector};
use tracing::debug;

pub struct EngineCore {
    /// Values as last requested
    pub params: ParameterSet,
    /// Values as last accepted by the hardware
    pub applied: ParameterSet,
    pub settings: EngineConfig,
    pub options: Option<CameraOptions>,
    pub angles: Angles,
    /// Sizes in the `Sensor` reference, set while bound
    pub capture_size: Option<Size>,
    pub preview_stream_size: Option<Size>,
    pub frame_processing_size: Option<Size>,
    pub picture_selector: Option<SizeSelector>,
    pub video_selector: Option<SizeSelector>,
    pub preview_stream_selector: Option<SizeSelector>,
    /// Set while a picture is being taken
    pub picture_recorder: Option<Box<dyn PictureRecorder>>,
    /// Set while metering runs ahead of a snapshot
    pub picture_pending: bool,
    /// Set while a video is being recorded
    pub video_recorder: Option<Box<dyn VideoRecorder>>,
    /// Set while a full video waits for its encoder stream to be bound
    pub video_pending: bool,
}

impl EngineCore {
    pub fn new(settings: EngineConfig) -> Self {
        let params = ParameterSet::from_config(&settings);
        Self {
            applied: params.clone(),
            params,
            settings,
            options: None,
            angles: Angles::new(),
            capture_size: None,
            preview_stream_size: None,
            frame_processing_size: None,
            picture_selector: None,
            video_selector: None,
            preview_stream_selector: None,
            picture_recorder: None,
            picture_pending: false,
            video_recorder: None,
            video_pending: false,
        }
    }

    pub fn options(&self) -> EngineResult<&CameraOptions> {
        self.options
            .as_ref()
            .ok_or_else(|| EngineError::Precondition("camera options not available".to_string()))
    }

    pub fn is_taking_picture(&self) -> bool {
        self.picture_pending || self.picture_recorder.is_some()
    }

    pub fn is_taking_video(&self) -> bool {
        self.video_pending || self.video_recorder.is_some()
    }

    /// Choose the picture or video size for `mode`, in the `Sensor` reference
    pub fn compute_capture_size(&self, mode: Mode) -> EngineResult<Size> {
        let options = self.options()?;
        let (candidates, external) = match mode {
            Mode::Picture => (options.picture_sizes(), self.picture_selector.clone()),
            Mode::Video => (options.video_sizes(), self.video_selector.clone()),
        };
        let selector = SizeSelector::or(external.into_iter().chain([SizeSelector::biggest()]).collect());
        let chosen = select_member(candidates, &selector, "capture")?;
        let flip = self.angles.flip(Reference::Sensor, Reference::View);
        debug!(mode = %mode, size = %chosen, flip, "Computed capture size");
        Ok(chosen.flip_if(flip))
    }

    /// Choose the preview stream size, in the `Sensor` reference
    ///
    /// `available` is in the `Sensor` reference, `surface` in `View`.
    pub fn compute_preview_stream_size(&self, available: &[Size], surface: Option<Size>) -> EngineResult<Size> {
        let flip = self.angles.flip(Reference::Sensor, Reference::View);
        let candidates: Vec<Size> = available.iter().map(|s| s.flip_if(flip)).collect();
        let target_min = surface
            .ok_or_else(|| EngineError::Precondition("preview surface size not available".to_string()))?;
        let capture = self
            .capture_size
            .ok_or_else(|| EngineError::Precondition("capture size not computed".to_string()))?;
        let mut target_ratio = capture.aspect_ratio();
        if flip {
            target_ratio = target_ratio.flip();
        }

        let match_ratio = SizeSelector::and(vec![
            SizeSelector::aspect_ratio(target_ratio, 0.0),
            SizeSelector::biggest(),
        ]);
        let match_size = SizeSelector::and(vec![
            SizeSelector::min_height(target_min.height),
            SizeSelector::min_width(target_min.width),
            SizeSelector::smallest(),
        ]);
        let match_all = SizeSelector::or(vec![
            SizeSelector::and(vec![match_ratio.clone(), match_size.clone()]),
            match_size,
            match_ratio,
            SizeSelector::biggest(),
        ]);
        let selector = match &self.preview_stream_selector {
            Some(external) => SizeSelector::or(vec![external.clone(), match_all]),
            None => match_all,
        };

        let chosen = select_member(&candidates, &selector, "preview stream")?;
        debug!(size = %chosen, ratio = %target_ratio, min = %target_min, flip, "Computed preview stream size");
        Ok(chosen.flip_if(flip))
    }

    /// Choose the frame processing size, in the `Sensor` reference
    pub fn compute_frame_processing_size(&self, available: &[Size]) -> EngineResult<Size> {
        let flip = self.angles.flip(Reference::Sensor, Reference::View);
        let candidates: Vec<Size> = available.iter().map(|s| s.flip_if(flip)).collect();
        let preview = self
            .preview_stream_size
            .ok_or_else(|| EngineError::Precondition("preview stream size not computed".to_string()))?;
        let mut target_ratio = preview.aspect_ratio();
        if flip {
            target_ratio = target_ratio.flip();
        }

        let max_width = positive_or(self.settings.frame_processing_max_width, frames::DEFAULT_FRAME_PROCESSING_MAX_WIDTH);
        let max_height = positive_or(self.settings.frame_processing_max_height, frames::DEFAULT_FRAME_PROCESSING_MAX_HEIGHT);
        let match_size = SizeSelector::and(vec![
            SizeSelector::max_height(max_height),
            SizeSelector::max_width(max_width),
            SizeSelector::biggest(),
        ]);
        let selector = SizeSelector::or(vec![
            SizeSelector::and(vec![SizeSelector::aspect_ratio(target_ratio, 0.0), match_size.clone()]),
            match_size,
            SizeSelector::smallest(),
        ]);

        let chosen = select_member(&candidates, &selector, "frame processing")?;
        debug!(size = %chosen, "Computed frame processing size");
        Ok(chosen.flip_if(flip))
    }

    /// Largest snapshot within the configured bounds, keeping the preview ratio
    pub fn uncropped_snapshot_size(&self, reference: Reference) -> Option<Size> {
        let base = self.preview_stream_size_in(reference)?;
        let flip = self.angles.flip(reference, Reference::View);
        let (mut max_width, mut max_height) = if flip {
            (self.settings.snapshot_max_height, self.settings.snapshot_max_width)
        } else {
            (self.settings.snapshot_max_width, self.settings.snapshot_max_height)
        };
        if max_width <= 0 {
            max_width = i32::MAX;
        }
        if max_height <= 0 {
            max_height = i32::MAX;
        }

        let base_ratio = base.width as f64 / base.height as f64;
        let max_ratio = max_width as f64 / max_height as f64;
        if max_ratio >= base_ratio {
            // Height binds
            let height = base.height.min(max_height);
            let width = (height as f64 * base_ratio).floor() as i32;
            Some(Size::new(width, height))
        } else {
            let width = base.width.min(max_width);
            let height = (width as f64 / base_ratio).floor() as i32;
            Some(Size::new(width, height))
        }
    }

    /// Picture size in `reference`; `None` in video mode or before binding
    pub fn picture_size(&self, reference: Reference) -> Option<Size> {
        if self.params.mode == Mode::Video {
            return None;
        }
        self.in_reference(self.capture_size, reference)
    }

    /// Video size in `reference`; `None` in picture mode or before binding
    pub fn video_size(&self, reference: Reference) -> Option<Size> {
        if self.params.mode == Mode::Picture {
            return None;
        }
        self.in_reference(self.capture_size, reference)
    }

    pub fn preview_stream_size_in(&self, reference: Reference) -> Option<Size> {
        self.in_reference(self.preview_stream_size, reference)
    }

    pub fn frame_processing_size_in(&self, reference: Reference) -> Option<Size> {
        self.in_reference(self.frame_processing_size, reference)
    }

    /// Preview surface size converted from `View` to `reference`
    pub fn surface_size_in(&self, surface: Option<Size>, reference: Reference) -> Option<Size> {
        let flip = self.angles.flip(Reference::View, reference);
        surface.map(|s| s.flip_if(flip))
    }

    /// Ratio of the surface as seen in the `Output` reference
    pub fn output_ratio(&self, surface: Option<Size>) -> Option<AspectRatio> {
        self.surface_size_in(surface, Reference::Output).map(|s| s.aspect_ratio())
    }

    fn in_reference(&self, size: Option<Size>, reference: Reference) -> Option<Size> {
        let flip = self.angles.flip(Reference::Sensor, reference);
        size.map(|s| s.flip_if(flip))
    }

    /// Forget everything computed while bound
    pub fn clear_bind_sizes(&mut self) {
        self.capture_size = None;
        self.preview_stream_size = None;
        self.frame_processing_size = None;
    }
}

fn positive_or(value: i32, default: i32) -> i32 {
    if value > 0 { value } else { default }
}

/// Run `selector` and insist the result is one of `candidates`
fn select_member(candidates: &[Size], selector: &SizeSelector, what: &str) -> EngineResult<Size> {
    if candidates.is_empty() {
        return Err(EngineError::Unsupported(format!("no {} sizes available", what)));
    }
    let chosen = selector
        .select(candidates)
        .first()
        .copied()
        .ok_or_else(|| EngineError::Unsupported(format!("no {} size matched {}", what, selector.label())))?;
    assert!(
        candidates.contains(&chosen),
        "selector {} returned {} which is not a candidate {} size",
        selector.label(),
        chosen,
        what
    );
    Ok(chosen)
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("params", &self.params)
            .field("capture_size", &self.capture_size)
            .field("preview_stream_size", &self.preview_stream_size)
            .field("taking_picture", &self.is_taking_picture())
            .field("taking_video", &self.is_taking_video())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controls::Facing;

    fn create_test_core(sensor_offset: i32) -> EngineCore {
        let mut core = EngineCore::new(EngineConfig::default());
        core.angles.set_sensor_offset(Facing::Back, sensor_offset);
        let flip = core.angles.flip(Reference::Sensor, Reference::View);
        let mut options = CameraOptions::new();
        for size in [Size::new(4000, 3000), Size::new(1920, 1080), Size::new(1280, 720)] {
            options.add_picture_size(size.flip_if(flip));
            options.add_video_size(size.flip_if(flip));
        }
        core.options = Some(options);
        core
    }

    fn sensor_preview_sizes() -> Vec<Size> {
        vec![
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(960, 720),
            Size::new(640, 480),
        ]
    }

    #[test]
    fn test_capture_size_defaults_to_biggest() {
        let core = create_test_core(0);
        assert_eq!(core.compute_capture_size(Mode::Picture).unwrap(), Size::new(4000, 3000));
    }

    #[test]
    fn test_capture_size_returns_sensor_reference() {
        let core = create_test_core(90);
        // Options hold portrait sizes, result is back in sensor landscape
        assert_eq!(core.compute_capture_size(Mode::Picture).unwrap(), Size::new(4000, 3000));
    }

    #[test]
    fn test_external_selector_wins() {
        let mut core = create_test_core(0);
        core.video_selector = Some(SizeSelector::max_width(1300));
        assert_eq!(core.compute_capture_size(Mode::Video).unwrap(), Size::new(1280, 720));
        // Unmatched selectors fall back to the biggest
        core.video_selector = Some(SizeSelector::min_width(10_000));
        assert_eq!(core.compute_capture_size(Mode::Video).unwrap(), Size::new(4000, 3000));
    }

    #[test]
    fn test_preview_matches_capture_ratio() {
        let mut core = create_test_core(0);
        core.capture_size = Some(Size::new(1920, 1080));
        let size = core
            .compute_preview_stream_size(&sensor_preview_sizes(), Some(Size::new(1000, 500)))
            .unwrap();
        assert_eq!(size, Size::new(1280, 720));
    }

    #[test]
    fn test_preview_with_rotated_sensor() {
        let mut core = create_test_core(90);
        core.capture_size = Some(Size::new(4000, 3000));
        // Portrait surface, sensor sizes are landscape. In the view the
        // 3:4 candidates are 1080x1440, 720x960 and 480x640; of those only
        // 1080x1440 and 720x960 cover 600x800, and the smallest is 720x960.
        let size = core
            .compute_preview_stream_size(&sensor_preview_sizes(), Some(Size::new(600, 800)))
            .unwrap();
        assert_eq!(size, Size::new(960, 720));
    }

    #[test]
    fn test_preview_without_surface_fails() {
        let mut core = create_test_core(0);
        core.capture_size = Some(Size::new(1920, 1080));
        assert!(core.compute_preview_stream_size(&sensor_preview_sizes(), None).is_err());
        assert!(core.compute_preview_stream_size(&[], Some(Size::new(10, 10))).is_err());
    }

    #[test]
    fn test_frame_processing_size_is_bounded() {
        let mut core = create_test_core(0);
        core.preview_stream_size = Some(Size::new(1280, 720));
        let available = vec![Size::new(1280, 720), Size::new(640, 360), Size::new(640, 480), Size::new(320, 240)];
        assert_eq!(core.compute_frame_processing_size(&available).unwrap(), Size::new(640, 360));
        core.settings.frame_processing_max_width = 100;
        core.settings.frame_processing_max_height = 100;
        assert_eq!(core.compute_frame_processing_size(&available).unwrap(), Size::new(320, 240));
    }

    #[test]
    fn test_uncropped_snapshot_size() {
        let mut core = create_test_core(0);
        core.preview_stream_size = Some(Size::new(1920, 1080));
        assert_eq!(core.uncropped_snapshot_size(Reference::View), Some(Size::new(1920, 1080)));

        core.settings.snapshot_max_width = 1000;
        core.settings.snapshot_max_height = 1000;
        // Box is taller than the stream, width binds
        assert_eq!(core.uncropped_snapshot_size(Reference::View), Some(Size::new(1000, 562)));

        core.settings.snapshot_max_width = 0;
        core.settings.snapshot_max_height = 540;
        assert_eq!(core.uncropped_snapshot_size(Reference::View), Some(Size::new(960, 540)));
    }

    #[test]
    fn test_mode_dependent_sizes() {
        let mut core = create_test_core(90);
        core.capture_size = Some(Size::new(4000, 3000));
        assert_eq!(core.picture_size(Reference::Sensor), Some(Size::new(4000, 3000)));
        assert_eq!(core.picture_size(Reference::View), Some(Size::new(3000, 4000)));
        assert_eq!(core.video_size(Reference::View), None);
        core.params.mode = Mode::Video;
        assert_eq!(core.picture_size(Reference::View), None);
        assert_eq!(core.video_size(Reference::Output), Some(Size::new(3000, 4000)));
    }
}
