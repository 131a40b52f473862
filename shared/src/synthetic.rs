//! Synthetic beam images for tests and the virtual camera.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Elliptical Gaussian spot.
///
/// `sigma = (sigma_major, sigma_minor)` are the standard deviations along the
/// beam axes, with the major axis rotated by `angle` radians from the x axis
/// (counter-clockwise in `(col, row)` coordinates).
pub fn gaussian_beam(
    width: usize,
    height: usize,
    center: (f64, f64),
    sigma: (f64, f64),
    angle: f64,
    amplitude: f64,
) -> Array2<f64> {
    let (sin, cos) = angle.sin_cos();
    let two_var_u = 2.0 * sigma.0 * sigma.0;
    let two_var_v = 2.0 * sigma.1 * sigma.1;

    Array2::from_shape_fn((height, width), |(row, col)| {
        let dx = col as f64 - center.0;
        let dy = row as f64 - center.1;
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        amplitude * (-(u * u / two_var_u + v * v / two_var_v)).exp()
    })
}

/// Square block of constant `value` and side `side` centred at `center`.
///
/// The block covers columns `round(cx - side/2) .. + side` (rows alike),
/// clipped to the frame.
pub fn uniform_block(
    width: usize,
    height: usize,
    center: (f64, f64),
    side: usize,
    value: f64,
) -> Array2<f64> {
    let mut image = Array2::zeros((height, width));
    let half = side as f64 / 2.0;
    let x0 = (center.0 - half).round().max(0.0) as usize;
    let y0 = (center.1 - half).round().max(0.0) as usize;

    for row in y0..(y0 + side).min(height) {
        for col in x0..(x0 + side).min(width) {
            image[[row, col]] = value;
        }
    }
    image
}

/// Add uniform noise in `[0, amplitude)` from a seeded generator.
pub fn add_uniform_noise(image: &mut Array2<f64>, amplitude: f64, seed: u64) {
    if amplitude <= 0.0 {
        return;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for pixel in image.iter_mut() {
        *pixel += rng.random_range(0.0..amplitude);
    }
}

/// Round and saturate to 8-bit samples.
pub fn to_u8(image: &Array2<f64>) -> Array2<u8> {
    image.mapv(|v| v.round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_peak_at_center() {
        let image = gaussian_beam(21, 21, (10.0, 10.0), (3.0, 3.0), 0.0, 50.0);
        assert_relative_eq!(image[[10, 10]], 50.0);
        assert!(image[[10, 13]] < 50.0);
        assert_relative_eq!(image[[10, 13]], image[[13, 10]], epsilon = 1e-12);
    }

    #[test]
    fn test_uniform_block_extent() {
        let image = uniform_block(100, 100, (50.0, 50.0), 20, 200.0);
        assert_eq!(image[[40, 40]], 200.0);
        assert_eq!(image[[59, 59]], 200.0);
        assert_eq!(image[[60, 50]], 0.0);
        assert_eq!(image[[39, 50]], 0.0);
        assert_relative_eq!(image.sum(), 200.0 * 400.0);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let mut a = Array2::zeros((5, 5));
        let mut b = Array2::zeros((5, 5));
        add_uniform_noise(&mut a, 3.0, 7);
        add_uniform_noise(&mut b, 3.0, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (0.0..3.0).contains(&v)));
    }
}
