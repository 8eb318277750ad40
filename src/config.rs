// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default.

use crate::backends::camera::BackendKind;
use crate::constants::{frames, timing};
use crate::engine::controls::{Audio, AudioCodec, Facing, FrameFormat, Mode, PictureFormat, VideoCodec};
use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Recorder settings used for full videos and video snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Stop recording after this many bytes, 0 for no limit
    pub max_size_bytes: u64,
    /// Stop recording after this many milliseconds, 0 for no limit
    pub max_duration_ms: u64,
    /// 0 lets the recorder choose
    pub video_bit_rate: u32,
    /// 0 lets the recorder choose
    pub audio_bit_rate: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::DeviceDefault,
            audio_codec: AudioCodec::DeviceDefault,
            max_size_bytes: 0,
            max_duration_ms: 0,
            video_bit_rate: 0,
            audio_bit_rate: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which hardware API drives the camera
    pub backend: BackendKind,
    pub facing: Facing,
    pub mode: Mode,
    pub audio: Audio,
    pub picture_format: PictureFormat,
    pub play_sounds: bool,
    /// Requested preview frame rate, 0 picks a default
    pub preview_frame_rate: f32,
    /// Prefer the narrowest fps range containing the requested rate
    pub preview_frame_rate_exact: bool,
    /// Bounding box for picture and video snapshots, 0 for unbounded
    pub snapshot_max_width: i32,
    pub snapshot_max_height: i32,
    /// Bounding box for frame processing sizes, 0 for the default
    pub frame_processing_max_width: i32,
    pub frame_processing_max_height: i32,
    /// Backend default when unset
    pub frame_processing_format: Option<FrameFormat>,
    pub frame_processing_pool_size: usize,
    pub auto_focus_reset_delay_ms: u64,
    /// Run metering before full pictures
    pub picture_metering: bool,
    /// Run metering before picture snapshots
    pub picture_snapshot_metering: bool,
    pub release_timeout_ms: u64,
    pub destroy_retries: u32,
    pub video: VideoSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            facing: Facing::Back,
            mode: Mode::Picture,
            audio: Audio::On,
            picture_format: PictureFormat::Jpeg,
            play_sounds: true,
            preview_frame_rate: 0.0,
            preview_frame_rate_exact: false,
            snapshot_max_width: 0,
            snapshot_max_height: 0,
            frame_processing_max_width: frames::DEFAULT_FRAME_PROCESSING_MAX_WIDTH,
            frame_processing_max_height: frames::DEFAULT_FRAME_PROCESSING_MAX_HEIGHT,
            frame_processing_format: None,
            frame_processing_pool_size: frames::DEFAULT_FRAME_POOL_SIZE,
            auto_focus_reset_delay_ms: timing::DEFAULT_AUTOFOCUS_RESET_DELAY.as_millis() as u64,
            picture_metering: true,
            picture_snapshot_metering: false,
            release_timeout_ms: timing::DEFAULT_RELEASE_TIMEOUT.as_millis() as u64,
            destroy_retries: timing::DEFAULT_DESTROY_RETRIES,
            video: VideoSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camera-engine").join("config.json"))
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        info!(path = %path.display(), backend = %config.backend, "Loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.frame_processing_pool_size == 0 {
            return Err(EngineError::Config(
                "frame_processing_pool_size must be at least 1".to_string(),
            ));
        }
        if self.destroy_retries == 0 {
            return Err(EngineError::Config(
                "destroy_retries must be at least 1".to_string(),
            ));
        }
        if self.preview_frame_rate < 0.0 {
            return Err(EngineError::Config(format!(
                "preview_frame_rate must not be negative, got {}",
                self.preview_frame_rate
            )));
        }
        Ok(())
    }

    pub fn auto_focus_reset_delay(&self) -> Duration {
        Duration::from_millis(self.auto_focus_reset_delay_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}
