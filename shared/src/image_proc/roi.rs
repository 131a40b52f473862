//! Region-of-interest extraction and cross sections.
//!
//! Two extraction modes are supported:
//! - a plain rectangular crop clamped to the frame, used when the requested
//!   angle is below [`MIN_ANGLE`]
//! - a rotated crop produced by inverse-mapping every output pixel through an
//!   affine transform and sampling the source bilinearly; output pixels that
//!   map outside the frame stay zero
//!
//! Each extracted [`Roi`] carries its [`RoiPlacement`] so that positions
//! measured inside the ROI can be mapped back to frame coordinates.

use ndarray::{s, Array1, Array2, ArrayView2};

/// Angles below this magnitude (radians) use a plain crop.
pub const MIN_ANGLE: f64 = 0.001;

/// Affine placement of an ROI inside its source frame.
///
/// ROI pixel `(u, v)` sits at `origin + u * axis_x + v * axis_y` in frame
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiPlacement {
    pub origin: (f64, f64),
    pub axis_x: (f64, f64),
    pub axis_y: (f64, f64),
}

impl RoiPlacement {
    /// Axis-aligned placement with its top-left pixel at `(x, y)`.
    pub fn offset(x: f64, y: f64) -> Self {
        Self {
            origin: (x, y),
            axis_x: (1.0, 0.0),
            axis_y: (0.0, 1.0),
        }
    }

    /// Map an ROI coordinate to frame coordinates.
    pub fn to_frame(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.origin.0 + u * self.axis_x.0 + v * self.axis_y.0,
            self.origin.1 + u * self.axis_x.1 + v * self.axis_y.1,
        )
    }
}

impl Default for RoiPlacement {
    fn default() -> Self {
        Self::offset(0.0, 0.0)
    }
}

/// Extracted sub-image and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub image: Array2<f64>,
    pub placement: RoiPlacement,
}

impl Roi {
    /// Wrap a whole frame as its own ROI.
    pub fn whole(image: Array2<f64>) -> Self {
        Self {
            image,
            placement: RoiPlacement::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

/// Lower/upper crop bounds along one axis, clamped to `[0, limit]`.
fn crop_bounds(center: f64, extent: f64, limit: usize) -> (usize, usize) {
    let half = extent / 2.0;
    let low = if center > half {
        ((center - half) as usize).min(limit)
    } else {
        0
    };
    let high = if center + half < limit as f64 {
        (center + half).max(0.0) as usize
    } else {
        limit
    };
    (low, high.max(low))
}

/// Rectangular crop of `width x height` centred at `center`, clamped to the frame.
pub fn sub_image(image: &ArrayView2<f64>, center: (f64, f64), width: f64, height: f64) -> Roi {
    let (rows, cols) = image.dim();
    let (x0, x1) = crop_bounds(center.0, width, cols);
    let (y0, y1) = crop_bounds(center.1, height, rows);

    Roi {
        image: image.slice(s![y0..y1, x0..x1]).to_owned(),
        placement: RoiPlacement::offset(x0 as f64, y0 as f64),
    }
}

/// Bilinear sample at `(x, y)`, `None` outside the pixel grid.
fn sample_bilinear(image: &ArrayView2<f64>, x: f64, y: f64) -> Option<f64> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return None;
    }
    let max_x = (cols - 1) as f64;
    let max_y = (rows - 1) as f64;
    if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let top = image[[y0, x0]] * (1.0 - fx) + image[[y0, x1]] * fx;
    let bottom = image[[y1, x0]] * (1.0 - fx) + image[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Rotated crop of exactly `width x height` pixels centred at `center`.
///
/// The ROI x axis points along `angle` (radians, counter-clockwise in
/// `(col, row)` coordinates). Falls back to [`sub_image`] for `|angle| <
/// MIN_ANGLE`.
pub fn rotate_sub_image(
    image: &ArrayView2<f64>,
    center: (f64, f64),
    width: f64,
    height: f64,
    angle: f64,
) -> Roi {
    if angle.abs() < MIN_ANGLE {
        return sub_image(image, center, width, height);
    }

    let w = width.max(0.0) as usize;
    let h = height.max(0.0) as usize;
    let (sin, cos) = angle.sin_cos();
    let axis_x = (cos, sin);
    let axis_y = (-sin, cos);
    let cx = center.0.trunc();
    let cy = center.1.trunc();
    let half_w = w.saturating_sub(1) as f64 / 2.0;
    let half_h = h.saturating_sub(1) as f64 / 2.0;
    let placement = RoiPlacement {
        origin: (
            cx - axis_x.0 * half_w - axis_y.0 * half_h,
            cy - axis_x.1 * half_w - axis_y.1 * half_h,
        ),
        axis_x,
        axis_y,
    };

    let output = Array2::from_shape_fn((h, w), |(v, u)| {
        let (x, y) = placement.to_frame(u as f64, v as f64);
        sample_bilinear(image, x, y).unwrap_or(0.0)
    });

    Roi {
        image: output,
        placement,
    }
}

/// Row and column of `image` passing through `(x, y)`.
///
/// Returns `(row_profile, column_profile)`. An out-of-range point yields
/// zero-filled profiles of the row and column lengths.
pub fn cross_section(image: &ArrayView2<f64>, x: f64, y: f64) -> (Array1<f64>, Array1<f64>) {
    let (rows, cols) = image.dim();
    let in_range = x.is_finite()
        && y.is_finite()
        && x >= 0.0
        && y >= 0.0
        && (x as usize) < cols
        && (y as usize) < rows;

    if !in_range {
        return (Array1::zeros(cols), Array1::zeros(rows));
    }

    (
        image.row(y as usize).to_owned(),
        image.column(x as usize).to_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn ramp(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
    }

    #[test]
    fn test_sub_image_inside_frame() {
        let image = ramp(20, 30);
        let roi = sub_image(&image.view(), (15.0, 10.0), 6.0, 4.0);
        assert_eq!(roi.image.dim(), (4, 6));
        assert_eq!(roi.placement.origin, (12.0, 8.0));
        assert_eq!(roi.image[[0, 0]], image[[8, 12]]);
    }

    #[test]
    fn test_sub_image_clamps_to_frame() {
        let image = ramp(20, 30);
        let roi = sub_image(&image.view(), (2.0, 18.0), 10.0, 10.0);
        assert_eq!(roi.placement.origin, (0.0, 13.0));
        assert_eq!(roi.image.dim(), (7, 7));
    }

    #[test]
    fn test_sub_image_far_outside_is_empty() {
        let image = ramp(20, 30);
        let roi = sub_image(&image.view(), (500.0, 500.0), 4.0, 4.0);
        assert!(roi.is_empty());
    }

    #[test]
    fn test_small_angle_uses_plain_crop() {
        let image = ramp(20, 30);
        let plain = sub_image(&image.view(), (15.0, 10.0), 6.0, 4.0);
        let rotated = rotate_sub_image(&image.view(), (15.0, 10.0), 6.0, 4.0, 0.0005);
        assert_eq!(plain, rotated);
    }

    #[test]
    fn test_quarter_turn_transposes_axes() {
        let image = ramp(21, 21);
        let roi = rotate_sub_image(&image.view(), (10.0, 10.0), 5.0, 3.0, FRAC_PI_2);
        assert_eq!(roi.image.dim(), (3, 5));

        // ROI x runs down the frame rows, ROI y runs toward decreasing columns
        let (x, y) = roi.placement.to_frame(2.0, 1.0);
        assert_relative_eq!(x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(y, 10.0, epsilon = 1e-9);
        assert_relative_eq!(roi.image[[1, 2]], image[[10, 10]], epsilon = 1e-6);
        assert_relative_eq!(roi.image[[1, 3]], image[[11, 10]], epsilon = 1e-6);
        assert_relative_eq!(roi.image[[2, 2]], image[[10, 9]], epsilon = 1e-6);
    }

    #[test]
    fn test_rotated_pixels_outside_frame_are_zero() {
        let image = Array2::<f64>::from_elem((10, 10), 5.0);
        let roi = rotate_sub_image(&image.view(), (0.0, 0.0), 6.0, 6.0, 0.3);
        assert_eq!(roi.image.dim(), (6, 6));
        assert_eq!(roi.image[[0, 0]], 0.0);
        assert_relative_eq!(roi.image[[5, 5]], 5.0);
    }

    #[test]
    fn test_cross_section_through_point() {
        let image = ramp(4, 5);
        let (row, column) = cross_section(&image.view(), 2.7, 1.2);
        assert_eq!(row.to_vec(), vec![5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(column.to_vec(), vec![2.0, 7.0, 12.0, 17.0]);
    }

    #[test]
    fn test_cross_section_out_of_bounds_is_zero_filled() {
        let image = ramp(4, 5);
        let (row, column) = cross_section(&image.view(), 9.0, 1.0);
        assert_eq!(row.len(), 5);
        assert_eq!(column.len(), 4);
        assert!(row.iter().chain(column.iter()).all(|&v| v == 0.0));
    }
}
