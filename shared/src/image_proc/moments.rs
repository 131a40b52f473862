//! Image moments and the 4-sigma beam geometry.
//!
//! The 4-sigma (second-moment) convention defines the beam diameter along an
//! axis as four standard deviations of the intensity distribution. With
//! rotation enabled the 2x2 covariance built from the central moments is
//! diagonalised to obtain major/minor diameters and the orientation angle.
//!
//! Pixel coordinates follow the usual image convention: `x` is the column
//! index and `y` the row index, both measured at pixel centres.

use ndarray::ArrayView2;
use std::f64::consts::FRAC_PI_4;

/// Raw and central moments of an intensity image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImageMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub mu20: f64,
    pub mu02: f64,
    pub mu11: f64,
}

impl ImageMoments {
    /// Compute moments of `image`.
    ///
    /// Central moments are accumulated in a second pass around the centroid,
    /// which keeps them well conditioned for large frames.
    pub fn compute(image: &ArrayView2<f64>) -> Self {
        let mut m00 = 0.0;
        let mut m10 = 0.0;
        let mut m01 = 0.0;
        for ((row, col), &value) in image.indexed_iter() {
            m00 += value;
            m10 += col as f64 * value;
            m01 += row as f64 * value;
        }

        if m00 == 0.0 {
            return Self::default();
        }

        let cx = m10 / m00;
        let cy = m01 / m00;
        let mut mu20 = 0.0;
        let mut mu02 = 0.0;
        let mut mu11 = 0.0;
        for ((row, col), &value) in image.indexed_iter() {
            let dx = col as f64 - cx;
            let dy = row as f64 - cy;
            mu20 += dx * dx * value;
            mu02 += dy * dy * value;
            mu11 += dx * dy * value;
        }

        Self {
            m00,
            m10,
            m01,
            mu20,
            mu02,
            mu11,
        }
    }

    /// Intensity-weighted centre `(x, y)`, `None` for a blank image.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 == 0.0 {
            None
        } else {
            Some((self.m10 / self.m00, self.m01 / self.m00))
        }
    }
}

/// Beam centre, 4-sigma diameters and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamGeometry {
    pub center_x: f64,
    pub center_y: f64,
    /// Diameter along the (rotated) x axis in pixels
    pub width: f64,
    /// Diameter along the (rotated) y axis in pixels
    pub height: f64,
    /// Orientation in radians, within ±π/4
    pub angle: f64,
}

impl BeamGeometry {
    pub fn center(&self) -> (f64, f64) {
        (self.center_x, self.center_y)
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}

/// numpy-style sign: 0 for 0.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Locate the beam by image moments.
///
/// A blank image (`m00 == 0`) yields the geometric middle with zero size and
/// zero angle. Without rotation the diameters are `4*sqrt(mu20/m00)` and
/// `4*sqrt(mu02/m00)`. With rotation the major axis is assigned to x when
/// `mu20 > mu02` and to y when `mu20 < mu02`; when they are equal the angle
/// is 0 for `mu11 == 0` and `±π/4` by the sign of `mu20` otherwise.
pub fn width_by_moments(image: &ArrayView2<f64>, with_rotation: bool) -> BeamGeometry {
    let (rows, cols) = image.dim();
    let moments = ImageMoments::compute(image);

    let Some((center_x, center_y)) = moments.centroid() else {
        return BeamGeometry {
            center_x: cols as f64 / 2.0,
            center_y: rows as f64 / 2.0,
            ..Default::default()
        };
    };

    let ImageMoments {
        m00,
        mu20,
        mu02,
        mu11,
        ..
    } = moments;

    let (width, height, angle) = if with_rotation {
        let scale = 2.0 * (2.0 / m00).sqrt();
        let diff = mu20 - mu02;
        let sum = mu20 + mu02;
        if diff > 0.0 {
            let root = (diff * diff + 4.0 * mu11 * mu11).sqrt();
            (
                scale * (sum + root).sqrt(),
                scale * (sum - root).abs().sqrt(),
                0.5 * (2.0 * mu11 / diff).atan(),
            )
        } else if diff < 0.0 {
            let root = (diff * diff + 4.0 * mu11 * mu11).sqrt();
            (
                scale * (sum - root).abs().sqrt(),
                scale * (sum + root).abs().sqrt(),
                0.5 * (2.0 * mu11 / diff).atan(),
            )
        } else {
            let cross = 2.0 * mu11.abs();
            let angle = if mu11 == 0.0 {
                0.0
            } else {
                FRAC_PI_4 * sign(mu20)
            };
            (
                scale * (sum + cross).abs().sqrt(),
                scale * (sum - cross).abs().sqrt(),
                angle,
            )
        }
    } else {
        (
            4.0 * (mu20 / m00).sqrt(),
            4.0 * (mu02 / m00).sqrt(),
            0.0,
        )
    };

    BeamGeometry {
        center_x,
        center_y,
        width,
        height,
        angle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{gaussian_beam, uniform_block};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_blank_image_returns_middle() {
        let image = Array2::<f64>::zeros((60, 80));
        let geometry = width_by_moments(&image.view(), true);
        assert_eq!(geometry.center(), (40.0, 30.0));
        assert_eq!(geometry.size(), (0.0, 0.0));
        assert_eq!(geometry.angle, 0.0);
    }

    #[test]
    fn test_gaussian_four_sigma() {
        let sigma = 6.0;
        let image = gaussian_beam(128, 128, (60.0, 70.0), (sigma, sigma), 0.0, 1000.0);
        let geometry = width_by_moments(&image.view(), false);

        assert_relative_eq!(geometry.center_x, 60.0, epsilon = 1e-6);
        assert_relative_eq!(geometry.center_y, 70.0, epsilon = 1e-6);
        assert_relative_eq!(geometry.width, 4.0 * sigma, max_relative = 1e-3);
        assert_relative_eq!(geometry.height, 4.0 * sigma, max_relative = 1e-3);
    }

    #[test]
    fn test_rotation_matches_axis_aligned_for_elliptical_beam() {
        let image = gaussian_beam(128, 128, (64.0, 64.0), (10.0, 4.0), 0.0, 1000.0);
        let plain = width_by_moments(&image.view(), false);
        let rotated = width_by_moments(&image.view(), true);

        assert_relative_eq!(rotated.width, plain.width, max_relative = 1e-6);
        assert_relative_eq!(rotated.height, plain.height, max_relative = 1e-6);
        assert_relative_eq!(rotated.angle, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotated_beam_angle_and_axes() {
        let angle = 20.0_f64.to_radians();
        let image = gaussian_beam(160, 160, (80.0, 80.0), (12.0, 5.0), angle, 1000.0);
        let geometry = width_by_moments(&image.view(), true);

        assert_relative_eq!(geometry.angle, angle, epsilon = 1e-3);
        assert_relative_eq!(geometry.width, 48.0, max_relative = 1e-2);
        assert_relative_eq!(geometry.height, 20.0, max_relative = 1e-2);
    }

    #[test]
    fn test_tall_beam_keeps_major_axis_on_y() {
        let image = gaussian_beam(128, 128, (64.0, 64.0), (4.0, 10.0), 0.0, 1000.0);
        let geometry = width_by_moments(&image.view(), true);
        assert!(geometry.height > geometry.width);
        assert_relative_eq!(geometry.height, 40.0, max_relative = 1e-2);
    }

    #[test]
    fn test_round_beam_tie_break_angle_is_zero() {
        let image = uniform_block(50, 50, (25.0, 25.0), 10, 100.0);
        let geometry = width_by_moments(&image.view(), true);
        assert_eq!(geometry.angle, 0.0);
    }

    #[test]
    fn test_tie_break_with_cross_term_is_quarter_turn() {
        // Two symmetric pixels on the diagonal: mu20 == mu02 and mu11 > 0
        let mut image = Array2::<f64>::zeros((10, 10));
        image[[2, 2]] = 1.0;
        image[[6, 6]] = 1.0;
        let geometry = width_by_moments(&image.view(), true);
        assert_relative_eq!(geometry.angle, FRAC_PI_4);
    }

    #[test]
    fn test_centroid_none_for_blank() {
        let image = Array2::<f64>::zeros((3, 3));
        assert!(ImageMoments::compute(&image.view()).centroid().is_none());
    }
}
