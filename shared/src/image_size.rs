//! Frame dimensions

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height of a frame or region of interest in pixels.
///
/// ndarray images are indexed `[row, col]`, so an array of shape
/// `(rows, cols)` has `height == rows` and `width == cols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width in pixels (number of columns)
    pub width: usize,
    /// Height in pixels (number of rows)
    pub height: usize,
}

impl ImageSize {
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Size of a 2-D image view.
    pub fn of_view<T>(image: &ArrayView2<T>) -> Self {
        let (rows, cols) = image.dim();
        Self {
            width: cols,
            height: rows,
        }
    }

    /// Array shape `(rows, cols)` for this size.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Geometric middle `(x, y)`, i.e. half the width and height.
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Whether the continuous point `(x, y)` lies inside the pixel grid.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from((width, height): (usize, usize)) -> Self {
        Self::from_width_height(width, height)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_size_of_view_uses_row_major_shape() {
        let image = Array2::<u8>::zeros((30, 40));
        let size = ImageSize::of_view(&image.view());
        assert_eq!(size.width, 40);
        assert_eq!(size.height, 30);
        assert_eq!(size.shape(), (30, 40));
        assert_eq!(size.to_string(), "40x30");
    }

    #[test]
    fn test_center_and_contains() {
        let size = ImageSize::from_width_height(100, 50);
        assert_eq!(size.center(), (50.0, 25.0));
        assert!(size.contains(99.5, 49.0));
        assert!(!size.contains(100.0, 10.0));
        assert!(!size.contains(-0.1, 10.0));
        assert!(ImageSize::from_width_height(0, 5).is_empty());
    }
}
