// SPDX-License-Identifier: MPL-2.0

//! Error types for the camera engine
//!
//! Hardware failures are reported as a [`CameraError`] carrying an
//! [`ErrorReason`] code. Everything else the engine can fail with is an
//! [`EngineError`].

use std::fmt;

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Reason codes dispatched to the engine callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    Unknown = 0,
    /// The device could not be opened
    FailedToConnect = 1,
    /// The device opened but the preview stream could not start
    FailedToStartPreview = 2,
    /// The device went away while in use
    Disconnected = 3,
    PictureFailed = 4,
    VideoFailed = 5,
    /// No device matches the requested facing
    NoCamera = 6,
}

impl ErrorReason {
    /// Numeric code of this reason
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorReason::Unknown => "UNKNOWN",
            ErrorReason::FailedToConnect => "FAILED_TO_CONNECT",
            ErrorReason::FailedToStartPreview => "FAILED_TO_START_PREVIEW",
            ErrorReason::Disconnected => "DISCONNECTED",
            ErrorReason::PictureFailed => "PICTURE_FAILED",
            ErrorReason::VideoFailed => "VIDEO_FAILED",
            ErrorReason::NoCamera => "NO_CAMERA",
        };
        write!(f, "{}", name)
    }
}

/// Camera hardware error with a reason code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraError {
    pub reason: ErrorReason,
    pub message: String,
}

impl CameraError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Whether the engine must be torn down before this error is dispatched
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self.reason,
            ErrorReason::FailedToConnect
                | ErrorReason::FailedToStartPreview
                | ErrorReason::Disconnected
        )
    }
}

/// Main engine error type
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Hardware failure with a reason code
    Camera(CameraError),
    /// Request rejected because a precondition does not hold
    Precondition(String),
    /// Capability not available on this device or backend
    Unsupported(String),
    /// Job removed, superseded or skipped because its starting state did not match
    Cancelled,
    /// Teardown did not finish in time
    Timeout(String),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
}

impl EngineError {
    /// Shortcut for a camera error with the given reason
    pub fn camera(reason: ErrorReason, message: impl Into<String>) -> Self {
        EngineError::Camera(CameraError::new(reason, message))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Reason code to report when this error reaches the callback
    pub fn reason(&self) -> ErrorReason {
        match self {
            EngineError::Camera(e) => e.reason,
            _ => ErrorReason::Unknown,
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.message)
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Camera(e) => write!(f, "Camera error: {}", e),
            EngineError::Precondition(msg) => write!(f, "Precondition failed: {}", msg),
            EngineError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            EngineError::Cancelled => write!(f, "Cancelled"),
            EngineError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
impl std::error::Error for EngineError {}

impl From<CameraError> for EngineError {
    fn from(err: CameraError) -> Self {
        EngineError::Camera(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(ErrorReason::Unknown.code(), 0);
        assert_eq!(ErrorReason::FailedToConnect.code(), 1);
        assert_eq!(ErrorReason::Disconnected.code(), 3);
        assert_eq!(ErrorReason::NoCamera.code(), 6);
    }

    #[test]
    fn test_unrecoverable_reasons() {
        let unrecoverable = [
            ErrorReason::FailedToConnect,
            ErrorReason::FailedToStartPreview,
            ErrorReason::Disconnected,
        ];
        for reason in unrecoverable {
            assert!(CameraError::new(reason, "").is_unrecoverable());
        }
        for reason in [
            ErrorReason::Unknown,
            ErrorReason::PictureFailed,
            ErrorReason::VideoFailed,
            ErrorReason::NoCamera,
        ] {
            assert!(
                !CameraError::new(reason, "").is_unrecoverable(),
                "{} should be recoverable",
                reason
            );
        }
    }

    #[test]
    fn test_display() {
        let err = EngineError::camera(ErrorReason::PictureFailed, "shutter jammed");
        assert_eq!(
            err.to_string(),
            "Camera error: PICTURE_FAILED: shutter jammed"
        );
        assert_eq!(err.reason(), ErrorReason::PictureFailed);
        assert_eq!(EngineError::Cancelled.reason(), ErrorReason::Unknown);
    }
}
