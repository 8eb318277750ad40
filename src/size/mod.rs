// SPDX-License-Identifier: GPL-3.0-only

//! Resolution value types and size negotiation
//!
//! Devices report the resolutions they can produce; the engine picks one with
//! a declarative [`SizeSelector`]. Selection never invents a size, every
//! result is an element of the candidate list.

mod selector;

pub use selector::SizeSelector;

use std::fmt;
use std::str::FromStr;

/// A width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Same size with the axes swapped
    pub fn flip(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        AspectRatio::of(*self)
    }

    /// Swap the axes when `flip` is true
    pub fn flip_if(&self, flip: bool) -> Self {
        if flip { self.flip() } else { *self }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    /// Parse "1920x1080"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w
            .trim()
            .parse::<i32>()
            .map_err(|e| format!("invalid width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse::<i32>()
            .map_err(|e| format!("invalid height '{}': {}", h, e))?;
        if width <= 0 || height <= 0 {
            return Err(format!("size must be positive, got {}x{}", width, height));
        }
        Ok(Size::new(width, height))
    }
}

/// A reduced width:height ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    x: i32,
    y: i32,
}

impl AspectRatio {
    /// Ratio of `x:y`, reduced by the greatest common divisor
    pub fn new(x: i32, y: i32) -> Self {
        let divisor = gcd(x.abs(), y.abs()).max(1);
        Self {
            x: x / divisor,
            y: y / divisor,
        }
    }

    pub fn of(size: Size) -> Self {
        Self::new(size.width, size.height)
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn to_f32(&self) -> f32 {
        if self.y == 0 {
            return 0.0;
        }
        self.x as f32 / self.y as f32
    }

    pub fn flip(&self) -> Self {
        Self {
            x: self.y,
            y: self.x,
        }
    }

    /// Whether `size` has this ratio within `tolerance`
    pub fn matches(&self, size: Size, tolerance: f32) -> bool {
        (self.to_f32() - AspectRatio::of(size).to_f32()).abs() <= tolerance
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    /// Parse "16:9"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected X:Y, got '{}'", s))?;
        let x = x.trim().parse::<i32>().map_err(|e| e.to_string())?;
        let y = y.trim().parse::<i32>().map_err(|e| e.to_string())?;
        if x <= 0 || y <= 0 {
            return Err(format!("ratio must be positive, got {}:{}", x, y));
        }
        Ok(AspectRatio::new(x, y))
    }
}

fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_is_reduced() {
        let ratio = AspectRatio::of(Size::new(1920, 1080));
        assert_eq!((ratio.x(), ratio.y()), (16, 9));
        assert_eq!(ratio, AspectRatio::new(32, 18));
        assert_eq!(ratio.to_string(), "16:9");
    }

    #[test]
    fn test_ratio_flip() {
        let ratio = AspectRatio::new(4, 3).flip();
        assert_eq!((ratio.x(), ratio.y()), (3, 4));
        assert!((ratio.to_f32() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ratio_matches_with_tolerance() {
        let wide = AspectRatio::new(16, 9);
        assert!(wide.matches(Size::new(1280, 720), 0.0));
        assert!(!wide.matches(Size::new(640, 480), 0.0));
        assert!(wide.matches(Size::new(1280, 768), 0.15));
    }

    #[test]
    fn test_size_flip_and_area() {
        let size = Size::new(640, 480);
        assert_eq!(size.flip(), Size::new(480, 640));
        assert_eq!(size.flip_if(false), size);
        assert_eq!(size.area(), 307_200);
    }

    #[test]
    fn test_parse() {
        assert_eq!("1920x1080".parse::<Size>(), Ok(Size::new(1920, 1080)));
        assert!("1920".parse::<Size>().is_err());
        assert!("0x10".parse::<Size>().is_err());
        assert_eq!("4:3".parse::<AspectRatio>(), Ok(AspectRatio::new(4, 3)));
        assert!("4/3".parse::<AspectRatio>().is_err());
    }
}
