// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use std::time::Duration;

/// Orchestrator job budgets for high-frequency parameter updates
pub mod jobs {
    /// Pending zoom jobs kept while a gesture streams new values
    pub const ALLOWED_ZOOM_OPS: usize = 20;

    /// Pending exposure correction jobs kept while a gesture streams new values
    pub const ALLOWED_EV_OPS: usize = 20;

    /// Job names that are cancelled or superseded by name
    pub const FOCUS_RESET: &str = "focus reset";
    pub const FOCUS_END: &str = "focus end";
    pub const RESET_METERING: &str = "reset metering";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Fallback after which an unanswered legacy auto focus is reported as failed
    pub const AUTOFOCUS_END_DELAY: Duration = Duration::from_millis(2500);

    /// Metering timeout for user-initiated auto focus
    pub const METER_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Metering timeout before a still capture
    pub const METER_TIMEOUT_SHORT: Duration = Duration::from_millis(2500);

    /// Default delay before focus and metering return to their defaults
    pub const DEFAULT_AUTOFOCUS_RESET_DELAY: Duration = Duration::from_millis(3000);

    /// Default time allowed for the device to be released
    pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(6);

    /// Default number of teardown attempts in destroy()
    pub const DEFAULT_DESTROY_RETRIES: u32 = 2;

    /// Interval between simulated preview frames
    pub const SIMULATED_FRAME_INTERVAL: Duration = Duration::from_millis(33);
}

/// Frame processing defaults
pub mod frames {
    /// Default bounding box for frame processing sizes
    pub const DEFAULT_FRAME_PROCESSING_MAX_WIDTH: i32 = 640;
    pub const DEFAULT_FRAME_PROCESSING_MAX_HEIGHT: i32 = 640;

    /// Default number of frames that can be held by processors at once
    pub const DEFAULT_FRAME_POOL_SIZE: usize = 2;
}

/// Frame rates preferred when the preview frame rate is left at 0
pub const PREFERRED_AUTO_FPS: [i32; 2] = [30, 24];

/// Default output folder name inside Pictures/Videos
pub const DEFAULT_SAVE_FOLDER: &str = "camera-engine";
