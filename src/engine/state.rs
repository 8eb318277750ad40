// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

/// Hardware readiness of the engine
///
/// States are totally ordered; the engine only moves between neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CameraState {
    #[default]
    Off = 0,
    /// Device open, options known
    Engine = 1,
    /// Sizes computed, outputs created
    Bind = 2,
    /// Repeating capture running
    Preview = 3,
}

impl CameraState {
    pub fn is_at_least(self, other: CameraState) -> bool {
        self >= other
    }

    /// Whether `self -> other` is a single step in either direction
    pub fn is_adjacent(self, other: CameraState) -> bool {
        (self as i32 - other as i32).abs() == 1
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraState::Off => write!(f, "OFF"),
            CameraState::Engine => write!(f, "ENGINE"),
            CameraState::Bind => write!(f, "BIND"),
            CameraState::Preview => write!(f, "PREVIEW"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(CameraState::Preview.is_at_least(CameraState::Bind));
        assert!(CameraState::Engine.is_at_least(CameraState::Engine));
        assert!(!CameraState::Off.is_at_least(CameraState::Engine));
    }

    #[test]
    fn test_adjacency() {
        assert!(CameraState::Off.is_adjacent(CameraState::Engine));
        assert!(CameraState::Preview.is_adjacent(CameraState::Bind));
        assert!(!CameraState::Off.is_adjacent(CameraState::Bind));
        assert!(!CameraState::Bind.is_adjacent(CameraState::Bind));
    }
}
