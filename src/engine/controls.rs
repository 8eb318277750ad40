// SPDX-License-Identifier: GPL-3.0-only

//! Camera control values
//!
//! Each control is a closed set of values. Whether a value is usable on the
//! current device is answered by [`CameraOptions`](super::options::CameraOptions).

use serde::{Deserialize, Serialize};

/// Which way the sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

impl Facing {
    pub const ALL: [Facing; 2] = [Facing::Back, Facing::Front];
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Flash {
    #[default]
    Off,
    On,
    Auto,
    /// Continuous light
    Torch,
}

impl Flash {
    pub const ALL: [Flash; 4] = [Flash::Off, Flash::On, Flash::Auto, Flash::Torch];
}

impl std::fmt::Display for Flash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flash::Off => write!(f, "off"),
            Flash::On => write!(f, "on"),
            Flash::Auto => write!(f, "auto"),
            Flash::Torch => write!(f, "torch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WhiteBalance {
    #[default]
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    Cloudy,
}

impl WhiteBalance {
    pub const ALL: [WhiteBalance; 5] = [
        WhiteBalance::Auto,
        WhiteBalance::Incandescent,
        WhiteBalance::Fluorescent,
        WhiteBalance::Daylight,
        WhiteBalance::Cloudy,
    ];
}

impl std::fmt::Display for WhiteBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhiteBalance::Auto => write!(f, "auto"),
            WhiteBalance::Incandescent => write!(f, "incandescent"),
            WhiteBalance::Fluorescent => write!(f, "fluorescent"),
            WhiteBalance::Daylight => write!(f, "daylight"),
            WhiteBalance::Cloudy => write!(f, "cloudy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Hdr {
    #[default]
    Off,
    On,
}

impl std::fmt::Display for Hdr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hdr::Off => write!(f, "off"),
            Hdr::On => write!(f, "on"),
        }
    }
}

/// Capture mode; decides whether picture or video sizes drive binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Picture,
    Video,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Picture => write!(f, "picture"),
            Mode::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Audio {
    Off,
    #[default]
    On,
    Mono,
    Stereo,
}

impl Audio {
    /// Channel count requested from the recorder, 0 when audio is off
    pub fn channels(&self) -> u32 {
        match self {
            Audio::Off => 0,
            Audio::Mono | Audio::On => 1,
            Audio::Stereo => 2,
        }
    }
}

/// Encoding of full-resolution pictures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PictureFormat {
    #[default]
    Jpeg,
    /// Raw sensor data
    Dng,
}

impl std::fmt::Display for PictureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PictureFormat::Jpeg => write!(f, "JPEG"),
            PictureFormat::Dng => write!(f, "DNG"),
        }
    }
}

/// Pixel layout of frames handed to frame processors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameFormat {
    /// YCrCb 4:2:0 semi-planar, produced by the legacy API
    Nv21,
    /// Flexible YUV 4:2:0, produced by the session API readers
    Yuv420,
    Rgba8888,
}

impl FrameFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            FrameFormat::Nv21 | FrameFormat::Yuv420 => 12,
            FrameFormat::Rgba8888 => 32,
        }
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFormat::Nv21 => write!(f, "NV21"),
            FrameFormat::Yuv420 => write!(f, "YUV_420_888"),
            FrameFormat::Rgba8888 => write!(f, "RGBA_8888"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    DeviceDefault,
    H263,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioCodec {
    #[default]
    DeviceDefault,
    Aac,
    HeAac,
    AacLd,
}

/// Geographic location attached to pictures and videos
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Fix time in seconds since the epoch
    pub timestamp: i64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            timestamp: 0,
        }
    }
}

/// Point on the preview surface, in surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}
