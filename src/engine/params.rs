// SPDX-License-Identifier: GPL-3.0-only

//! Live parameters and their resolution against device capabilities
//!
//! A setter stores the requested [`Parameter`] right away so reads reflect
//! it, then a job resolves it against [`CameraOptions`] into a
//! [`ParameterChange`] the backend can apply. A request that cannot be
//! resolved or applied is rolled back to the last applied value.

use super::controls::{Audio, Facing, Flash, FrameFormat, Hdr, Location, Mode, PictureFormat, WhiteBalance};
use super::options::{CameraOptions, FpsRange};
use crate::config::EngineConfig;
use crate::constants::PREFERRED_AUTO_FPS;

/// A requested value for a live parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parameter {
    Flash(Flash),
    WhiteBalance(WhiteBalance),
    Hdr(Hdr),
    /// Normalised zoom in 0..=1
    Zoom(f32),
    /// Exposure correction in EV
    ExposureCorrection(f32),
    PlaySounds(bool),
    /// Requested preview frame rate, 0 picks a sensible default
    PreviewFrameRate(f32),
    Location(Option<Location>),
}

impl Parameter {
    /// Name of the job that applies this parameter
    pub fn job_name(&self) -> String {
        match self {
            Parameter::Flash(v) => format!("flash ({})", v),
            Parameter::WhiteBalance(v) => format!("white balance ({})", v),
            Parameter::Hdr(v) => format!("hdr ({})", v),
            Parameter::Zoom(_) => "zoom".to_string(),
            Parameter::ExposureCorrection(_) => "exposure correction".to_string(),
            Parameter::PlaySounds(v) => format!("play sounds ({})", v),
            Parameter::PreviewFrameRate(v) => format!("preview fps ({})", v),
            Parameter::Location(_) => "location".to_string(),
        }
    }

    /// False for NaN or infinite numeric values, which never compare equal
    pub fn is_finite(&self) -> bool {
        match *self {
            Parameter::Zoom(v) | Parameter::ExposureCorrection(v) | Parameter::PreviewFrameRate(v) => v.is_finite(),
            _ => true,
        }
    }

    /// Check the request against `options`
    ///
    /// Returns the value to hand to the backend, or `None` when the device
    /// cannot honour it.
    pub fn resolve(&self, options: &CameraOptions, frame_rate_exact: bool) -> Option<ParameterChange> {
        match *self {
            Parameter::Flash(flash) => options
                .supports_flash(flash)
                .then_some(ParameterChange::Flash(flash)),
            Parameter::WhiteBalance(wb) => options
                .supports_white_balance(wb)
                .then_some(ParameterChange::WhiteBalance(wb)),
            Parameter::Hdr(hdr) => options.supports_hdr(hdr).then_some(ParameterChange::Hdr(hdr)),
            Parameter::Zoom(zoom) => options
                .zoom_supported
                .then_some(ParameterChange::Zoom(zoom.clamp(0.0, 1.0))),
            Parameter::ExposureCorrection(ev) => {
                if !options.exposure_correction_supported {
                    return None;
                }
                let clamped = ev
                    .min(options.exposure_correction_max)
                    .max(options.exposure_correction_min);
                Some(ParameterChange::ExposureCorrection(clamped))
            }
            Parameter::PlaySounds(play) => Some(ParameterChange::PlaySounds(play)),
            Parameter::PreviewFrameRate(rate) => {
                choose_fps_range(options, rate, frame_rate_exact)
                    .map(|(rate, range)| ParameterChange::PreviewFrameRate { rate, range })
            }
            Parameter::Location(location) => Some(ParameterChange::Location(location)),
        }
    }
}

/// A resolved parameter value ready for the hardware
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterChange {
    Flash(Flash),
    WhiteBalance(WhiteBalance),
    Hdr(Hdr),
    Zoom(f32),
    ExposureCorrection(f32),
    PlaySounds(bool),
    PreviewFrameRate { rate: f32, range: FpsRange },
    Location(Option<Location>),
}

impl ParameterChange {
    /// The value the engine reports once this change is applied
    pub fn as_parameter(&self) -> Parameter {
        match *self {
            ParameterChange::Flash(v) => Parameter::Flash(v),
            ParameterChange::WhiteBalance(v) => Parameter::WhiteBalance(v),
            ParameterChange::Hdr(v) => Parameter::Hdr(v),
            ParameterChange::Zoom(v) => Parameter::Zoom(v),
            ParameterChange::ExposureCorrection(v) => Parameter::ExposureCorrection(v),
            ParameterChange::PlaySounds(v) => Parameter::PlaySounds(v),
            ParameterChange::PreviewFrameRate { rate, .. } => Parameter::PreviewFrameRate(rate),
            ParameterChange::Location(v) => Parameter::Location(v),
        }
    }
}

/// Pick the fps range for a requested preview frame rate
///
/// Ranges must contain the device's minimum or maximum rate. They are tried
/// narrowest first when `exact` is set and a rate was requested, widest first
/// otherwise. A rate of 0 takes the first range containing a preferred rate;
/// any other rate is clamped to the device bounds and rounded.
pub fn choose_fps_range(options: &CameraOptions, rate: f32, exact: bool) -> Option<(f32, FpsRange)> {
    let ascending = exact && rate != 0.0;
    let mut ranges = options.fps_ranges.clone();
    ranges.sort_by(|a, b| {
        if ascending {
            a.width().cmp(&b.width())
        } else {
            b.width().cmp(&a.width())
        }
    });

    let min = options.preview_frame_rate_min.round() as i32;
    let max = options.preview_frame_rate_max.round() as i32;
    let mut candidates = ranges
        .into_iter()
        .filter(|range| range.contains(min) || range.contains(max));

    if rate == 0.0 {
        return candidates
            .find(|range| PREFERRED_AUTO_FPS.iter().any(|fps| range.contains(*fps)))
            .map(|range| (0.0, range));
    }

    let clamped = rate
        .min(options.preview_frame_rate_max)
        .max(options.preview_frame_rate_min);
    let target = clamped.round() as i32;
    candidates
        .find(|range| range.contains(target))
        .map(|range| (clamped, range))
}

/// Every user-facing setting of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    pub facing: Facing,
    pub mode: Mode,
    pub audio: Audio,
    pub picture_format: PictureFormat,
    pub flash: Flash,
    pub white_balance: WhiteBalance,
    pub hdr: Hdr,
    pub zoom: f32,
    pub exposure_correction: f32,
    pub play_sounds: bool,
    pub preview_frame_rate: f32,
    pub location: Option<Location>,
    pub has_frame_processors: bool,
    pub frame_processing_format: Option<FrameFormat>,
}

impl ParameterSet {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            facing: config.facing,
            mode: config.mode,
            audio: config.audio,
            picture_format: config.picture_format,
            flash: Flash::default(),
            white_balance: WhiteBalance::default(),
            hdr: Hdr::default(),
            zoom: 0.0,
            exposure_correction: 0.0,
            play_sounds: config.play_sounds,
            preview_frame_rate: config.preview_frame_rate,
            location: None,
            has_frame_processors: false,
            frame_processing_format: config.frame_processing_format,
        }
    }

    /// Current value of the same parameter as `like`
    pub fn get(&self, like: &Parameter) -> Parameter {
        match like {
            Parameter::Flash(_) => Parameter::Flash(self.flash),
            Parameter::WhiteBalance(_) => Parameter::WhiteBalance(self.white_balance),
            Parameter::Hdr(_) => Parameter::Hdr(self.hdr),
            Parameter::Zoom(_) => Parameter::Zoom(self.zoom),
            Parameter::ExposureCorrection(_) => Parameter::ExposureCorrection(self.exposure_correction),
            Parameter::PlaySounds(_) => Parameter::PlaySounds(self.play_sounds),
            Parameter::PreviewFrameRate(_) => Parameter::PreviewFrameRate(self.preview_frame_rate),
            Parameter::Location(_) => Parameter::Location(self.location),
        }
    }

    /// Store `value`, returning the previous value
    pub fn set(&mut self, value: Parameter) -> Parameter {
        let previous = self.get(&value);
        match value {
            Parameter::Flash(v) => self.flash = v,
            Parameter::WhiteBalance(v) => self.white_balance = v,
            Parameter::Hdr(v) => self.hdr = v,
            Parameter::Zoom(v) => self.zoom = v,
            Parameter::ExposureCorrection(v) => self.exposure_correction = v,
            Parameter::PlaySounds(v) => self.play_sounds = v,
            Parameter::PreviewFrameRate(v) => self.preview_frame_rate = v,
            Parameter::Location(v) => self.location = v,
        }
        previous
    }

    /// Whether `value` is still the stored value
    pub fn holds(&self, value: &Parameter) -> bool {
        self.get(value) == *value
    }

    /// Every live parameter, in the order they are applied on open
    pub fn live_parameters(&self) -> [Parameter; 8] {
        [
            Parameter::Flash(self.flash),
            Parameter::WhiteBalance(self.white_balance),
            Parameter::Hdr(self.hdr),
            Parameter::Zoom(self.zoom),
            Parameter::ExposureCorrection(self.exposure_correction),
            Parameter::PlaySounds(self.play_sounds),
            Parameter::PreviewFrameRate(self.preview_frame_rate),
            Parameter::Location(self.location),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_options() -> CameraOptions {
        let mut options = CameraOptions::new();
        options.supported_flash.insert(Flash::Off);
        options.supported_flash.insert(Flash::Torch);
        options.exposure_correction_supported = true;
        options.exposure_correction_min = -2.0;
        options.exposure_correction_max = 2.0;
        options.set_fps_ranges(vec![
            FpsRange::new(15, 15),
            FpsRange::new(15, 30),
            FpsRange::new(30, 30),
            FpsRange::new(7, 30),
        ]);
        options
    }

    #[test]
    fn test_unsupported_values_do_not_resolve() {
        let options = create_test_options();
        assert_eq!(Parameter::Flash(Flash::On).resolve(&options, false), None);
        assert_eq!(
            Parameter::Flash(Flash::Torch).resolve(&options, false),
            Some(ParameterChange::Flash(Flash::Torch))
        );
        assert_eq!(Parameter::Zoom(0.5).resolve(&options, false), None);
    }

    #[test]
    fn test_non_finite_values_are_flagged() {
        assert!(!Parameter::Zoom(f32::NAN).is_finite());
        assert!(!Parameter::ExposureCorrection(f32::INFINITY).is_finite());
        assert!(!Parameter::PreviewFrameRate(f32::NEG_INFINITY).is_finite());
        assert!(Parameter::Zoom(0.5).is_finite());
        assert!(Parameter::Flash(Flash::Off).is_finite());
    }

    #[test]
    fn test_exposure_is_clamped() {
        let options = create_test_options();
        assert_eq!(
            Parameter::ExposureCorrection(5.0).resolve(&options, false),
            Some(ParameterChange::ExposureCorrection(2.0))
        );
    }

    #[test]
    fn test_auto_frame_rate_prefers_widest() {
        let options = create_test_options();
        let (rate, range) = choose_fps_range(&options, 0.0, true).unwrap();
        assert_eq!(rate, 0.0);
        assert_eq!(range, FpsRange::new(7, 30));
    }

    #[test]
    fn test_exact_frame_rate_prefers_narrowest() {
        let options = create_test_options();
        let (_, range) = choose_fps_range(&options, 30.0, true).unwrap();
        assert_eq!(range, FpsRange::new(30, 30));
        let (_, range) = choose_fps_range(&options, 30.0, false).unwrap();
        assert_eq!(range, FpsRange::new(7, 30));
    }

    #[test]
    fn test_frame_rate_is_clamped() {
        let options = create_test_options();
        let (rate, range) = choose_fps_range(&options, 120.0, true).unwrap();
        assert_eq!(rate, 30.0);
        assert!(range.contains(30));
    }

    #[test]
    fn test_no_ranges() {
        assert_eq!(choose_fps_range(&CameraOptions::new(), 30.0, false), None);
    }

    #[test]
    fn test_set_returns_previous() {
        let mut params = ParameterSet::from_config(&EngineConfig::default());
        let previous = params.set(Parameter::Zoom(0.4));
        assert_eq!(previous, Parameter::Zoom(0.0));
        assert!(params.holds(&Parameter::Zoom(0.4)));
        assert!(!params.holds(&Parameter::Zoom(0.1)));
    }
}
