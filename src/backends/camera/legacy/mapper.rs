// SPDX-License-Identifier: GPL-3.0-only

//! Translation between engine controls and legacy parameter strings

use super::device::{CAMERA_FACING_BACK, CAMERA_FACING_FRONT, LegacyCameraApi, LegacyParameters};
use crate::engine::controls::{Facing, Flash, FrameFormat, Hdr, Mode, PictureFormat, WhiteBalance};
use crate::engine::options::{CameraOptions, FpsRange};
use crate::size::Size;

pub const FLASH_MODE_OFF: &str = "off";
pub const FLASH_MODE_ON: &str = "on";
pub const FLASH_MODE_AUTO: &str = "auto";
pub const FLASH_MODE_TORCH: &str = "torch";

pub const WHITE_BALANCE_AUTO: &str = "auto";
pub const WHITE_BALANCE_INCANDESCENT: &str = "incandescent";
pub const WHITE_BALANCE_FLUORESCENT: &str = "fluorescent";
pub const WHITE_BALANCE_DAYLIGHT: &str = "daylight";
pub const WHITE_BALANCE_CLOUDY_DAYLIGHT: &str = "cloudy-daylight";

pub const SCENE_MODE_AUTO: &str = "auto";
pub const SCENE_MODE_HDR: &str = "hdr";

pub const FOCUS_MODE_AUTO: &str = "auto";
pub const FOCUS_MODE_CONTINUOUS_VIDEO: &str = "continuous-video";
pub const FOCUS_MODE_CONTINUOUS_PICTURE: &str = "continuous-picture";
pub const FOCUS_MODE_INFINITY: &str = "infinity";
pub const FOCUS_MODE_FIXED: &str = "fixed";

pub fn map_flash(flash: Flash) -> &'static str {
    match flash {
        Flash::Off => FLASH_MODE_OFF,
        Flash::On => FLASH_MODE_ON,
        Flash::Auto => FLASH_MODE_AUTO,
        Flash::Torch => FLASH_MODE_TORCH,
    }
}

pub fn unmap_flash(value: &str) -> Option<Flash> {
    Flash::ALL.into_iter().find(|f| map_flash(*f) == value)
}

pub fn map_white_balance(white_balance: WhiteBalance) -> &'static str {
    match white_balance {
        WhiteBalance::Auto => WHITE_BALANCE_AUTO,
        WhiteBalance::Incandescent => WHITE_BALANCE_INCANDESCENT,
        WhiteBalance::Fluorescent => WHITE_BALANCE_FLUORESCENT,
        WhiteBalance::Daylight => WHITE_BALANCE_DAYLIGHT,
        WhiteBalance::Cloudy => WHITE_BALANCE_CLOUDY_DAYLIGHT,
    }
}

pub fn unmap_white_balance(value: &str) -> Option<WhiteBalance> {
    WhiteBalance::ALL.into_iter().find(|wb| map_white_balance(*wb) == value)
}

pub fn map_hdr(hdr: Hdr) -> &'static str {
    match hdr {
        Hdr::Off => SCENE_MODE_AUTO,
        Hdr::On => SCENE_MODE_HDR,
    }
}

pub fn unmap_hdr(value: &str) -> Option<Hdr> {
    [Hdr::Off, Hdr::On].into_iter().find(|h| map_hdr(*h) == value)
}

pub fn map_facing(facing: Facing) -> i32 {
    match facing {
        Facing::Back => CAMERA_FACING_BACK,
        Facing::Front => CAMERA_FACING_FRONT,
    }
}

pub fn unmap_facing(value: i32) -> Option<Facing> {
    Facing::ALL.into_iter().find(|f| map_facing(*f) == value)
}

/// Continuous focus for the mode, else whatever fixed mode exists
pub fn default_focus_mode(params: &LegacyParameters, mode: Mode) -> Option<&'static str> {
    let supports = |m: &str| params.supported_focus_modes.iter().any(|s| s == m);
    if mode == Mode::Video && supports(FOCUS_MODE_CONTINUOUS_VIDEO) {
        return Some(FOCUS_MODE_CONTINUOUS_VIDEO);
    }
    [FOCUS_MODE_CONTINUOUS_PICTURE, FOCUS_MODE_INFINITY, FOCUS_MODE_FIXED]
        .into_iter()
        .find(|m| supports(m))
}

/// Capabilities of the camera at `params`
///
/// Picture and video sizes are flipped into the `View` reference when
/// `flip_sizes` is set.
pub fn build_options(api: &dyn LegacyCameraApi, params: &LegacyParameters, flip_sizes: bool) -> CameraOptions {
    let mut options = CameraOptions::new();

    for index in 0..api.camera_count() {
        if let Some(facing) = api.camera_info(index).and_then(|info| unmap_facing(info.facing)) {
            options.supported_facing.insert(facing);
        }
    }

    let strings = |list: &Option<Vec<String>>| list.clone().unwrap_or_default();
    options
        .supported_white_balance
        .extend(strings(&params.supported_white_balance).iter().filter_map(|s| unmap_white_balance(s)));
    options.supported_flash.insert(Flash::Off);
    options
        .supported_flash
        .extend(strings(&params.supported_flash_modes).iter().filter_map(|s| unmap_flash(s)));
    options.supported_hdr.insert(Hdr::Off);
    options
        .supported_hdr
        .extend(strings(&params.supported_scene_modes).iter().filter_map(|s| unmap_hdr(s)));

    options.zoom_supported = params.zoom_supported;
    options.auto_focus_supported = params.supported_focus_modes.iter().any(|m| m == FOCUS_MODE_AUTO);

    let step = params.exposure_compensation_step;
    options.exposure_correction_min = params.min_exposure_compensation as f32 * step;
    options.exposure_correction_max = params.max_exposure_compensation as f32 * step;
    options.exposure_correction_supported =
        params.min_exposure_compensation != 0 || params.max_exposure_compensation != 0;

    for size in &params.supported_picture_sizes {
        options.add_picture_size(size.flip_if(flip_sizes));
    }

    // Recorders reject anything above the largest profile
    let max_video = params.max_video_size.unwrap_or(Size::new(i32::MAX, i32::MAX));
    let video_sizes = params
        .supported_video_sizes
        .as_ref()
        .unwrap_or(&params.supported_preview_sizes);
    for size in video_sizes {
        if size.width <= max_video.width && size.height <= max_video.height {
            options.add_video_size(size.flip_if(flip_sizes));
        }
    }

    let ranges: Vec<FpsRange> = params
        .supported_preview_fps_ranges
        .iter()
        .map(|[min, max]| FpsRange::new(*min / 1000, *max / 1000))
        .collect();
    options.preview_frame_rate_min = ranges.iter().map(|r| r.min as f32).fold(f32::MAX, f32::min);
    options.preview_frame_rate_max = ranges.iter().map(|r| r.max as f32).fold(-f32::MAX, f32::max);
    options.set_fps_ranges(ranges);

    options.supported_picture_formats.insert(PictureFormat::Jpeg);
    options.supported_frame_formats.insert(FrameFormat::Nv21);
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_strings() {
        for flash in Flash::ALL {
            assert_eq!(unmap_flash(map_flash(flash)), Some(flash));
        }
        for wb in WhiteBalance::ALL {
            assert_eq!(unmap_white_balance(map_white_balance(wb)), Some(wb));
        }
        assert_eq!(unmap_hdr("hdr"), Some(Hdr::On));
        assert_eq!(unmap_flash("red-eye"), None);
        assert_eq!(unmap_facing(CAMERA_FACING_FRONT), Some(Facing::Front));
    }

    #[test]
    fn test_default_focus_prefers_continuous() {
        let mut params = LegacyParameters {
            supported_focus_modes: vec![FOCUS_MODE_FIXED.into(), FOCUS_MODE_CONTINUOUS_PICTURE.into()],
            ..Default::default()
        };
        assert_eq!(default_focus_mode(&params, Mode::Video), Some(FOCUS_MODE_CONTINUOUS_PICTURE));
        params.supported_focus_modes.push(FOCUS_MODE_CONTINUOUS_VIDEO.into());
        assert_eq!(default_focus_mode(&params, Mode::Video), Some(FOCUS_MODE_CONTINUOUS_VIDEO));
        assert_eq!(default_focus_mode(&params, Mode::Picture), Some(FOCUS_MODE_CONTINUOUS_PICTURE));
        params.supported_focus_modes.clear();
        assert_eq!(default_focus_mode(&params, Mode::Picture), None);
    }
}
