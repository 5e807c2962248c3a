//! Integer pixel rectangle.

use serde::{Deserialize, Serialize};

/// A pixel-space rectangle with top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Scale all coordinates by `factor`, rounding to the nearest pixel.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: (self.x as f64 * factor).round() as u32,
            y: (self.y as f64 * factor).round() as u32,
            width: (self.width as f64 * factor).round().max(1.0) as u32,
            height: (self.height as f64 * factor).round().max(1.0) as u32,
        }
    }

    /// Whether the rectangle covers zero pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled() {
        let r = Rect::new(300, 600, 900, 450).scaled(1.0 / 3.0);
        assert_eq!(r, Rect::new(100, 200, 300, 150));
    }

    #[test]
    fn test_scaled_never_collapses() {
        let r = Rect::new(0, 0, 1, 1).scaled(1.0 / 3.0);
        assert_eq!(r.width, 1);
        assert_eq!(r.height, 1);
    }
}
