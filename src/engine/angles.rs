// SPDX-License-Identifier: GPL-3.0-only

//! Orientation bookkeeping between sensor, display and device
//!
//! Four references are tracked: `Base` (natural device orientation), `View`
//! (what the preview surface shows), `Output` (how the user holds the device)
//! and `Sensor`. Offsets are clockwise degrees in {0, 90, 180, 270}.

use super::controls::Facing;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    Base,
    View,
    Output,
    Sensor,
}

/// How an offset is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Absolute,
    /// Mirrored for front sensors, as consumed by the sensor pipeline
    RelativeToSensor,
}

#[derive(Debug, Clone)]
pub struct Angles {
    facing: Facing,
    sensor_offset: i32,
    display_offset: i32,
    device_orientation: i32,
}

impl Default for Angles {
    fn default() -> Self {
        Self::new()
    }
}

impl Angles {
    pub fn new() -> Self {
        Self {
            facing: Facing::Back,
            sensor_offset: 0,
            display_offset: 0,
            device_orientation: 0,
        }
    }

    /// Record the sensor mounting angle for the opened camera
    ///
    /// Front sensors are stored mirrored.
    pub fn set_sensor_offset(&mut self, facing: Facing, sensor_offset: i32) {
        sanitize(sensor_offset);
        self.facing = facing;
        self.sensor_offset = if facing == Facing::Front {
            sanitize(360 - sensor_offset)
        } else {
            sensor_offset
        };
        debug!(facing = %facing, offset = self.sensor_offset, "Sensor offset set");
    }

    pub fn set_display_offset(&mut self, display_offset: i32) {
        self.display_offset = sanitize(display_offset);
    }

    pub fn set_device_orientation(&mut self, device_orientation: i32) {
        self.device_orientation = sanitize(device_orientation);
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Clockwise degrees to go from `from` to `to`
    pub fn offset(&self, from: Reference, to: Reference, axis: Axis) -> i32 {
        let offset = self.absolute_offset(from, to);
        if axis == Axis::RelativeToSensor && self.facing == Facing::Front {
            sanitize(360 - offset)
        } else {
            offset
        }
    }

    /// Whether going from `from` to `to` swaps width and height
    pub fn flip(&self, from: Reference, to: Reference) -> bool {
        self.offset(from, to, Axis::Absolute) % 180 != 0
    }

    fn absolute_offset(&self, from: Reference, to: Reference) -> i32 {
        if from == to {
            return 0;
        }
        if to == Reference::Base {
            return sanitize(360 - self.absolute_offset(to, from));
        }
        if from == Reference::Base {
            return match to {
                Reference::View => sanitize(360 - self.display_offset),
                Reference::Output => self.device_orientation,
                Reference::Sensor => sanitize(360 - self.sensor_offset),
                Reference::Base => 0,
            };
        }
        let from_base = self.absolute_offset(Reference::Base, from);
        let to_base = self.absolute_offset(Reference::Base, to);
        sanitize(to_base - from_base)
    }
}

/// Normalise to 0..360 and require a right angle
fn sanitize(degrees: i32) -> i32 {
    let degrees = degrees.rem_euclid(360);
    assert!(
        degrees % 90 == 0,
        "orientation must be a multiple of 90 degrees, got {}",
        degrees
    );
    degrees
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let angles = Angles::new();
        assert_eq!(angles.offset(Reference::Sensor, Reference::Sensor, Axis::Absolute), 0);
        assert!(!angles.flip(Reference::Sensor, Reference::View));
    }

    #[test]
    fn test_back_sensor_rotated() {
        let mut angles = Angles::new();
        angles.set_sensor_offset(Facing::Back, 90);
        assert_eq!(angles.offset(Reference::Base, Reference::Sensor, Axis::Absolute), 270);
        assert_eq!(angles.offset(Reference::Sensor, Reference::View, Axis::Absolute), 90);
        assert!(angles.flip(Reference::Sensor, Reference::View));
        assert!(angles.flip(Reference::View, Reference::Sensor));
    }

    #[test]
    fn test_front_sensor_is_mirrored() {
        let mut angles = Angles::new();
        angles.set_sensor_offset(Facing::Front, 270);
        assert_eq!(angles.offset(Reference::Base, Reference::Sensor, Axis::Absolute), 270);
        assert_eq!(
            angles.offset(Reference::Sensor, Reference::View, Axis::RelativeToSensor),
            270
        );
    }

    #[test]
    fn test_display_and_device() {
        let mut angles = Angles::new();
        angles.set_display_offset(90);
        angles.set_device_orientation(180);
        assert_eq!(angles.offset(Reference::Base, Reference::View, Axis::Absolute), 270);
        assert_eq!(angles.offset(Reference::View, Reference::Base, Axis::Absolute), 90);
        assert_eq!(angles.offset(Reference::View, Reference::Output, Axis::Absolute), 270);
    }

    #[test]
    #[should_panic(expected = "multiple of 90")]
    fn test_rejects_odd_angles() {
        Angles::new().set_display_offset(45);
    }
}
