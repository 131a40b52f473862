//! Camera frames and conversion to intensity images

use ndarray::{Array2, Array3, Axis};

use crate::image_size::ImageSize;

/// Luma weights applied to RGB frames (ITU-R BT.601).
const LUMA_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

/// A single frame as produced by a camera driver.
///
/// Colour frames are stored as `(rows, cols, 3)` arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Mono8(Array2<u8>),
    Mono16(Array2<u16>),
    Rgb8(Array3<u8>),
}

impl Frame {
    pub fn size(&self) -> ImageSize {
        let (rows, cols) = match self {
            Frame::Mono8(data) => data.dim(),
            Frame::Mono16(data) => data.dim(),
            Frame::Rgb8(data) => {
                let (rows, cols, _) = data.dim();
                (rows, cols)
            }
        };
        ImageSize::from_width_height(cols, rows)
    }

    /// Bits per sample of the underlying storage.
    pub fn bit_depth(&self) -> u32 {
        match self {
            Frame::Mono8(_) | Frame::Rgb8(_) => 8,
            Frame::Mono16(_) => 16,
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Frame::Rgb8(_))
    }

    /// Single-channel intensity image in `f64`.
    pub fn to_intensity(&self) -> Array2<f64> {
        match self {
            Frame::Mono8(data) => data.mapv(f64::from),
            Frame::Mono16(data) => data.mapv(f64::from),
            Frame::Rgb8(data) => {
                let (rows, cols, _) = data.dim();
                let mut gray = Array2::<f64>::zeros((rows, cols));
                for (channel, weight) in LUMA_WEIGHTS.iter().enumerate() {
                    let plane = data.index_axis(Axis(2), channel);
                    gray.zip_mut_with(&plane, |g, &v| *g += weight * f64::from(v));
                }
                gray.mapv_inplace(f64::round);
                gray
            }
        }
    }

    /// Brightest sample of the frame, 0 for an empty frame.
    pub fn max_value(&self) -> f64 {
        match self {
            Frame::Mono8(data) => data.iter().copied().max().map_or(0.0, f64::from),
            Frame::Mono16(data) => data.iter().copied().max().map_or(0.0, f64::from),
            Frame::Rgb8(data) => data.iter().copied().max().map_or(0.0, f64::from),
        }
    }
}

impl From<Array2<u8>> for Frame {
    fn from(data: Array2<u8>) -> Self {
        Frame::Mono8(data)
    }
}

impl From<Array2<u16>> for Frame {
    fn from(data: Array2<u16>) -> Self {
        Frame::Mono16(data)
    }
}
