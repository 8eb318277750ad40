// SPDX-License-Identifier: GPL-3.0-only

//! Metering regions for touch-to-focus
//!
//! Regions are built in preview surface coordinates around the touched point
//! and transformed into whatever space the hardware expects.

use super::angles::{Angles, Axis, Reference};
use super::controls::PointF;
use crate::size::Size;

/// Share of the surface covered by the focus box
const POINT_AREA: f32 = 0.05;
/// The background region is this much larger than the focus box
const BLUR_FACTOR_SIZE: f32 = 1.5;
/// ...and weighs this much less
const BLUR_FACTOR_WEIGHT: f32 = 0.1;
pub const MAX_WEIGHT: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    /// Rectangle of `width` x `height` centered on `center`
    pub fn around(center: PointF, width: f32, height: f32) -> Self {
        Self {
            left: center.x - width / 2.0,
            top: center.y - height / 2.0,
            right: center.x + width / 2.0,
            bottom: center.y + height / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> PointF {
        PointF::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    fn corners(&self) -> [PointF; 4] {
        [
            PointF::new(self.left, self.top),
            PointF::new(self.right, self.top),
            PointF::new(self.right, self.bottom),
            PointF::new(self.left, self.bottom),
        ]
    }

    fn clip(&self, bounds: Size) -> Self {
        Self {
            left: self.left.max(0.0),
            top: self.top.max(0.0),
            right: self.right.min(bounds.width as f32),
            bottom: self.bottom.min(bounds.height as f32),
        }
    }

    /// Bounding box of the transformed corners
    fn transform(&self, f: &impl Fn(PointF) -> PointF) -> Self {
        let points = self.corners().map(f);
        let mut rect = Self {
            left: f32::MAX,
            top: f32::MAX,
            right: f32::MIN,
            bottom: f32::MIN,
        };
        for p in points {
            rect.left = rect.left.min(p.x);
            rect.top = rect.top.min(p.y);
            rect.right = rect.right.max(p.x);
            rect.bottom = rect.bottom.max(p.y);
        }
        rect
    }
}

/// Integer rectangle in hardware coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeteringRegion {
    pub rect: RectF,
    pub weight: i32,
}

impl MeteringRegion {
    /// Rounded rectangle for the hardware
    pub fn to_rect(&self) -> Rect {
        Rect {
            left: self.rect.left.round() as i32,
            top: self.rect.top.round() as i32,
            right: self.rect.right.round() as i32,
            bottom: self.rect.bottom.round() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeteringRegions {
    regions: Vec<MeteringRegion>,
}

impl MeteringRegions {
    /// A focus box around `point` plus a lighter background box
    pub fn from_point(surface: Size, point: PointF) -> Self {
        let area = RectF::around(
            point,
            POINT_AREA * surface.width as f32,
            POINT_AREA * surface.height as f32,
        );
        let background = RectF::around(
            area.center(),
            BLUR_FACTOR_SIZE * area.width(),
            BLUR_FACTOR_SIZE * area.height(),
        );
        let regions = vec![
            MeteringRegion {
                rect: area.clip(surface),
                weight: MAX_WEIGHT,
            },
            MeteringRegion {
                rect: background.clip(surface),
                weight: (BLUR_FACTOR_WEIGHT * MAX_WEIGHT as f32).round() as i32,
            },
        ];
        Self { regions }
    }

    pub fn transform(&self, f: impl Fn(PointF) -> PointF) -> Self {
        Self {
            regions: self
                .regions
                .iter()
                .map(|r| MeteringRegion {
                    rect: r.rect.transform(&f),
                    weight: r.weight,
                })
                .collect(),
        }
    }

    /// At most `count` regions, heaviest first
    pub fn top(&self, count: usize) -> Vec<MeteringRegion> {
        let mut regions = self.regions.clone();
        regions.sort_by(|a, b| b.weight.cmp(&a.weight));
        regions.truncate(count);
        regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Map surface points into the -1000..1000 sensor-relative square
pub fn legacy_transform(angles: &Angles, surface: Size) -> impl Fn(PointF) -> PointF + use<> {
    let display_to_sensor = -angles.offset(Reference::Sensor, Reference::View, Axis::Absolute);
    let theta = (display_to_sensor as f64).to_radians();
    let (width, height) = (surface.width as f32, surface.height as f32);
    move |point| {
        let x = (-1000.0 + (point.x / width) * 2000.0) as f64;
        let y = (-1000.0 + (point.y / height) * 2000.0) as f64;
        PointF::new(
            (x * theta.cos() - y * theta.sin()) as f32,
            (x * theta.sin() + y * theta.cos()) as f32,
        )
    }
}

/// Map surface points onto a sensor array of `array` pixels
pub fn array_transform(angles: &Angles, surface: Size, array: Size) -> impl Fn(PointF) -> PointF + use<> {
    let to_sensor = angles.offset(Reference::View, Reference::Sensor, Axis::Absolute);
    let (width, height) = (surface.width as f32, surface.height as f32);
    let (array_width, array_height) = (array.width as f32, array.height as f32);
    move |point| {
        // Normalise, rotate about the center, then scale to the array
        let (nx, ny) = (point.x / width, point.y / height);
        let (rx, ry) = match to_sensor {
            90 => (ny, 1.0 - nx),
            180 => (1.0 - nx, 1.0 - ny),
            270 => (1.0 - ny, nx),
            _ => (nx, ny),
        };
        PointF::new(
            (rx * array_width).clamp(0.0, array_width),
            (ry * array_height).clamp(0.0, array_height),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controls::Facing;

    #[test]
    fn test_regions_from_center_point() {
        let surface = Size::new(1000, 2000);
        let regions = MeteringRegions::from_point(surface, PointF::new(500.0, 1000.0));
        assert_eq!(regions.len(), 2);
        let top = regions.top(1);
        assert_eq!(top[0].weight, MAX_WEIGHT);
        assert_eq!(top[0].to_rect(), Rect { left: 475, top: 950, right: 525, bottom: 1050 });
    }

    #[test]
    fn test_regions_clipped_at_edges() {
        let regions = MeteringRegions::from_point(Size::new(100, 100), PointF::new(0.0, 0.0));
        for region in regions.top(2) {
            assert!(region.rect.left >= 0.0 && region.rect.top >= 0.0);
        }
    }

    #[test]
    fn test_legacy_transform_center_maps_to_origin() {
        let mut angles = Angles::new();
        angles.set_sensor_offset(Facing::Back, 90);
        let f = legacy_transform(&angles, Size::new(1080, 1920));
        let p = f(PointF::new(540.0, 960.0));
        assert!(p.x.abs() < 0.01 && p.y.abs() < 0.01);
        let corner = f(PointF::new(0.0, 0.0));
        assert!((corner.x.abs() - 1000.0).abs() < 0.5);
        assert!((corner.y.abs() - 1000.0).abs() < 0.5);
    }

    #[test]
    fn test_array_transform_without_rotation() {
        let angles = Angles::new();
        let f = array_transform(&angles, Size::new(100, 50), Size::new(4000, 3000));
        assert_eq!(f(PointF::new(50.0, 25.0)), PointF::new(2000.0, 1500.0));
        assert_eq!(f(PointF::new(100.0, 50.0)), PointF::new(4000.0, 3000.0));
    }
}
