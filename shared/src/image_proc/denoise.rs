//! Background suppression by histogram-mode thresholding.
//!
//! Beam images are mostly background, so the most frequent intensity value is
//! a good estimate of the noise floor. Pixels at or below that level are set
//! to zero while everything brighter is kept unchanged.

use ndarray::{Array2, ArrayView2};

/// Intensity with the highest frequency in the image.
///
/// Samples are binned to the nearest non-negative integer, which is exact for
/// camera data and a close approximation for interpolated ROIs. Ties resolve
/// to the lowest intensity. Returns 0 for an empty image.
pub fn noise_level_from_histogram(image: &ArrayView2<f64>) -> f64 {
    let Some(max) = image.iter().copied().reduce(f64::max) else {
        return 0.0;
    };
    if !max.is_finite() || max < 0.0 {
        return 0.0;
    }

    let mut histogram = vec![0usize; max.round() as usize + 1];
    for &value in image.iter() {
        if value.is_finite() {
            histogram[value.max(0.0).round() as usize] += 1;
        }
    }

    let mut mode = 0;
    for (bin, &count) in histogram.iter().enumerate() {
        if count > histogram[mode] {
            mode = bin;
        }
    }
    mode as f64
}

/// Zero every pixel at or below `level`.
///
/// A zero level leaves the image untouched.
pub fn threshold_to_zero(image: &ArrayView2<f64>, level: f64) -> Array2<f64> {
    if level == 0.0 {
        return image.to_owned();
    }
    image.mapv(|value| if value > level { value } else { 0.0 })
}

/// Threshold at the histogram mode.
pub fn remove_background(image: &ArrayView2<f64>) -> Array2<f64> {
    let level = noise_level_from_histogram(image);
    threshold_to_zero(image, level)
}
