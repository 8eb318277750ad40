// SPDX-License-Identifier: GPL-3.0-only

//! Translation between engine controls and session request values

use super::device::{AeMode, AwbMode, FlashMode, LENS_FACING_BACK, LENS_FACING_FRONT, SceneMode, SessionCharacteristics};
use crate::engine::controls::{Facing, Flash, FrameFormat, Hdr, PictureFormat, WhiteBalance};
use crate::engine::options::CameraOptions;
use crate::errors::{EngineError, EngineResult};
use crate::size::Size;

/// AE and flash mode pairs expressing `flash`, most preferred first
pub fn map_flash(flash: Flash) -> &'static [(AeMode, FlashMode)] {
    match flash {
        Flash::On => &[(AeMode::OnAlwaysFlash, FlashMode::Off)],
        Flash::Auto => &[
            (AeMode::OnAutoFlash, FlashMode::Off),
            (AeMode::OnAutoFlashRedeye, FlashMode::Off),
        ],
        Flash::Off => &[(AeMode::On, FlashMode::Off), (AeMode::Off, FlashMode::Off)],
        Flash::Torch => &[(AeMode::On, FlashMode::Torch), (AeMode::Off, FlashMode::Torch)],
    }
}

/// Flash values an AE mode makes possible
pub fn unmap_flash(mode: AeMode) -> &'static [Flash] {
    match mode {
        AeMode::Off | AeMode::On => &[Flash::Off, Flash::Torch],
        AeMode::OnAlwaysFlash => &[Flash::On],
        AeMode::OnAutoFlash | AeMode::OnAutoFlashRedeye => &[Flash::Auto],
    }
}

pub fn map_white_balance(white_balance: WhiteBalance) -> AwbMode {
    match white_balance {
        WhiteBalance::Auto => AwbMode::Auto,
        WhiteBalance::Incandescent => AwbMode::Incandescent,
        WhiteBalance::Fluorescent => AwbMode::Fluorescent,
        WhiteBalance::Daylight => AwbMode::Daylight,
        WhiteBalance::Cloudy => AwbMode::CloudyDaylight,
    }
}

pub fn unmap_white_balance(mode: AwbMode) -> Option<WhiteBalance> {
    WhiteBalance::ALL.into_iter().find(|wb| map_white_balance(*wb) == mode)
}

pub fn map_hdr(hdr: Hdr) -> SceneMode {
    match hdr {
        Hdr::Off => SceneMode::Disabled,
        Hdr::On => SceneMode::Hdr,
    }
}

pub fn unmap_hdr(mode: SceneMode) -> Option<Hdr> {
    [Hdr::Off, Hdr::On].into_iter().find(|h| map_hdr(*h) == mode)
}

pub fn map_facing(facing: Facing) -> i32 {
    match facing {
        Facing::Back => LENS_FACING_BACK,
        Facing::Front => LENS_FACING_FRONT,
    }
}

pub fn unmap_facing(value: i32) -> Option<Facing> {
    Facing::ALL.into_iter().find(|f| map_facing(*f) == value)
}

/// Capabilities of `characteristics`
///
/// `all` holds every camera on the system, for the facing set. Sizes are
/// flipped into the `View` reference when `flip_sizes` is set. Fails when
/// the camera can't produce `picture_format`.
pub fn build_options(
    characteristics: &SessionCharacteristics,
    all: &[SessionCharacteristics],
    flip_sizes: bool,
    picture_format: PictureFormat,
) -> EngineResult<CameraOptions> {
    let mut options = CameraOptions::new();

    options
        .supported_facing
        .extend(all.iter().filter_map(|c| unmap_facing(c.lens_facing)));
    options.supported_white_balance.extend(
        characteristics
            .awb_available_modes
            .iter()
            .filter_map(|m| unmap_white_balance(*m)),
    );
    options.supported_flash.insert(Flash::Off);
    if characteristics.flash_available {
        for mode in &characteristics.ae_available_modes {
            options.supported_flash.extend(unmap_flash(*mode).iter().copied());
        }
    }
    options.supported_hdr.insert(Hdr::Off);
    options
        .supported_hdr
        .extend(characteristics.scene_modes.iter().filter_map(|m| unmap_hdr(*m)));

    options.zoom_supported = characteristics.max_digital_zoom > 1.0;
    options.auto_focus_supported = characteristics.max_regions_af > 0
        || characteristics.max_regions_ae > 0
        || characteristics.max_regions_awb > 0;

    let (lower, upper) = characteristics.ae_compensation_range;
    let step = characteristics.ae_compensation_step;
    if step > 0.0 {
        options.exposure_correction_min = lower as f32 * step;
        options.exposure_correction_max = upper as f32 * step;
    }
    options.exposure_correction_supported =
        options.exposure_correction_min != 0.0 && options.exposure_correction_max != 0.0;

    if picture_format == PictureFormat::Dng && !characteristics.raw_supported {
        return Err(EngineError::Unsupported(format!("picture format {}", picture_format)));
    }
    for size in characteristics.picture_sizes(picture_format) {
        options.add_picture_size(size.flip_if(flip_sizes));
    }

    let max_video = characteristics.max_video_size.unwrap_or(Size::new(i32::MAX, i32::MAX));
    for size in &characteristics.recorder_sizes {
        if size.width <= max_video.width && size.height <= max_video.height {
            options.add_video_size(size.flip_if(flip_sizes));
        }
    }

    let ranges = characteristics.fps_ranges.clone();
    if ranges.is_empty() {
        options.preview_frame_rate_min = 0.0;
        options.preview_frame_rate_max = 0.0;
    } else {
        options.preview_frame_rate_min = ranges.iter().map(|r| r.min as f32).fold(f32::MAX, f32::min);
        options.preview_frame_rate_max = ranges.iter().map(|r| r.max as f32).fold(-f32::MAX, f32::max);
    }
    options.set_fps_ranges(ranges);

    options.supported_picture_formats.insert(PictureFormat::Jpeg);
    if characteristics.raw_supported {
        options.supported_picture_formats.insert(PictureFormat::Dng);
    }
    options.supported_frame_formats.insert(FrameFormat::Yuv420);
    options
        .supported_frame_formats
        .extend(characteristics.frame_formats.iter().copied());
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::session::simulated::{back_characteristics, front_characteristics};

    #[test]
    fn test_flash_round_trip() {
        for flash in Flash::ALL {
            for (ae, _) in map_flash(flash) {
                assert!(unmap_flash(*ae).contains(&flash), "{:?} lost through {:?}", flash, ae);
            }
        }
        for wb in WhiteBalance::ALL {
            assert_eq!(unmap_white_balance(map_white_balance(wb)), Some(wb));
        }
        assert_eq!(unmap_white_balance(AwbMode::Off), None);
    }

    #[test]
    fn test_options_of_back_camera() {
        let back = back_characteristics();
        let all = [back.clone(), front_characteristics()];
        let options = build_options(&back, &all, false, PictureFormat::Jpeg).unwrap();
        assert!(options.supports_facing(Facing::Front));
        assert!(options.supports_flash(Flash::Torch));
        assert!(options.supports_flash(Flash::Auto));
        assert!(options.zoom_supported);
        assert!(options.auto_focus_supported);
        assert!(options.supports_picture_format(PictureFormat::Dng));
        assert!(options.exposure_correction_min < 0.0);
        // Video sizes are capped by the recorder profiles
        let max_video = back.max_video_size.unwrap();
        assert!(options.video_sizes().iter().all(|s| s.width <= max_video.width));
    }

    #[test]
    fn test_front_camera_has_no_raw() {
        let front = front_characteristics();
        let err = build_options(&front, std::slice::from_ref(&front), true, PictureFormat::Dng).unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
        let options = build_options(&front, std::slice::from_ref(&front), true, PictureFormat::Jpeg).unwrap();
        assert!(!options.zoom_supported);
        assert!(!options.supports_flash(Flash::Torch));
        let first = front.jpeg_sizes[0];
        assert!(options.picture_sizes().contains(&first.flip()));
    }
}
