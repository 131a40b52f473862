//! Image processing for beam analysis
//!
//! Numerical building blocks shared by the beam finder and profiler stages.

pub mod beam_width;
pub mod denoise;
pub mod gauss_fit;
pub mod moments;
pub mod roi;

pub use beam_width::{
    power_area, width_by_level, width_by_power_level, PowerLevelSearch, PowerLevelWidth,
    DEFAULT_INTENSITY_LEVEL, DEFAULT_POWER_LEVEL,
};
pub use denoise::{noise_level_from_histogram, remove_background, threshold_to_zero};
pub use gauss_fit::{fit_gaussian, GaussFit, GaussParams, DEFAULT_MAX_ITERATIONS};
pub use moments::{width_by_moments, BeamGeometry, ImageMoments};
pub use roi::{cross_section, rotate_sub_image, sub_image, Roi, RoiPlacement, MIN_ANGLE};
