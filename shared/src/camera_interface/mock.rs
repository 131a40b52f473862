//! Virtual camera producing synthetic beam frames.
//!
//! The frame peak follows the exposure setting (`exposure + 100`, saturating
//! at 255 for 8-bit output), which gives exposure control a monotonic plant
//! to work against. Uniform noise with amplitude `exposure * 0.01` is added
//! on top of the normalised spot pattern.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{
    CameraError, CameraInterface, CameraProperty, CameraResult, PropertyRange, PropertyState,
};
use crate::frame::Frame;
use crate::image_size::ImageSize;
use crate::synthetic::{gaussian_beam, to_u8};

/// Spot layout rendered by [`VirtualCamera`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VirtualPattern {
    /// Noise only
    Zero,
    /// Single round spot
    #[default]
    Round,
    /// Two spots stacked vertically
    Perpendicular,
    /// Second spot below and to the right
    Left,
    /// Second spot below and to the left
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualCameraConfig {
    pub size: ImageSize,
    /// Pixel pitch in micrometres
    pub pixel_size: f64,
    pub pattern: VirtualPattern,
    /// Spot standard deviation in pixels
    pub sigma: f64,
    pub exposure: f64,
    pub fps: f64,
    /// Add per-frame noise
    pub noise: bool,
    pub seed: u64,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            size: ImageSize::from_width_height(640, 480),
            pixel_size: 5.5,
            pattern: VirtualPattern::Round,
            sigma: 48.0,
            exposure: 100.0,
            fps: 30.0,
            noise: true,
            seed: 0x5eed,
        }
    }
}

pub struct VirtualCamera {
    config: VirtualCameraConfig,
    exposure: PropertyState,
    fps: PropertyState,
    spot_center: (f64, f64),
    opened: bool,
    running: bool,
    rng: ChaCha8Rng,
}

impl Default for VirtualCamera {
    fn default() -> Self {
        Self::new(VirtualCameraConfig::default())
    }
}

impl VirtualCamera {
    pub fn new(config: VirtualCameraConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let (width, height) = (config.size.width as f64, config.size.height as f64);
        let spot_center = if config.size.is_empty() {
            (0.0, 0.0)
        } else {
            (
                rng.random_range(width / 4.0..width / 2.0).floor(),
                rng.random_range(height / 4.0..height / 2.0).floor(),
            )
        };

        Self {
            exposure: PropertyState::new(PropertyRange::new(1.0, 255.0, 0.1), config.exposure),
            fps: PropertyState::new(PropertyRange::new(1.0, 60.0, 0.1), config.fps),
            spot_center,
            opened: false,
            running: false,
            rng,
            config,
        }
    }

    pub fn config(&self) -> &VirtualCameraConfig {
        &self.config
    }

    /// Centre of the primary spot in pixel coordinates.
    pub fn spot_center(&self) -> (f64, f64) {
        self.spot_center
    }

    pub fn set_pattern(&mut self, pattern: VirtualPattern) {
        self.config.pattern = pattern;
    }

    fn noise_field(&mut self, amplitude: f64) -> Array2<f64> {
        let shape = self.config.size.shape();
        Array2::from_shape_simple_fn(shape, || {
            if amplitude > 0.0 {
                self.rng.random_range(0.0..amplitude)
            } else {
                0.0
            }
        })
    }

    fn spot(&self, offset: (f64, f64)) -> Array2<f64> {
        let ImageSize { width, height } = self.config.size;
        let sigma = self.config.sigma;
        let center = (self.spot_center.0 + offset.0, self.spot_center.1 + offset.1);
        gaussian_beam(width, height, center, (sigma, sigma), 0.0, 1.0)
    }

    /// Render one frame at the current exposure.
    pub fn render(&mut self) -> Array2<u8> {
        let exposure = self.exposure.value;
        let sigma = self.config.sigma;
        let second_spot = match self.config.pattern {
            VirtualPattern::Zero | VirtualPattern::Round => None,
            VirtualPattern::Perpendicular => Some((0.0, sigma / 1.5)),
            VirtualPattern::Left => Some((sigma / 2.0, sigma / 1.5)),
            VirtualPattern::Right => Some((-sigma / 2.0, sigma / 1.5)),
        };

        let mut image = match self.config.pattern {
            VirtualPattern::Zero => self.noise_field(exposure * 0.01),
            _ => self.spot((0.0, 0.0)),
        };
        if let Some(offset) = second_spot {
            image += &self.spot(offset);
        }

        let peak = image.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            image *= (exposure + 100.0) / peak;
        }
        if self.config.noise {
            image += &self.noise_field(exposure * 0.01);
        }
        to_u8(&image)
    }

    fn property(&self, property: CameraProperty) -> CameraResult<&PropertyState> {
        match property {
            CameraProperty::Exposure => Ok(&self.exposure),
            CameraProperty::Fps => Ok(&self.fps),
            CameraProperty::Gain => Err(CameraError::UnsupportedProperty(property)),
        }
    }
}

impl CameraInterface for VirtualCamera {
    fn name(&self) -> &str {
        "virtual"
    }

    fn open(&mut self) -> CameraResult<()> {
        if self.config.size.is_empty() {
            return Err(CameraError::ConfigError(format!(
                "invalid frame size {}",
                self.config.size
            )));
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> CameraResult<()> {
        self.running = false;
        self.opened = false;
        Ok(())
    }

    fn start(&mut self) -> CameraResult<()> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> CameraResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn query_frame(&mut self) -> CameraResult<Option<Frame>> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        if !self.running {
            return Ok(None);
        }
        Ok(Some(Frame::Mono8(self.render())))
    }

    fn frame_size(&self) -> ImageSize {
        self.config.size
    }

    fn pixel_size(&self) -> f64 {
        self.config.pixel_size
    }

    fn has_property(&self, property: CameraProperty) -> bool {
        self.property(property).is_ok()
    }

    fn property_value(&self, property: CameraProperty) -> CameraResult<f64> {
        self.property(property).map(|state| state.value)
    }

    fn set_property_value(&mut self, property: CameraProperty, value: f64) -> CameraResult<f64> {
        if !value.is_finite() {
            return Err(CameraError::PropertyRejected {
                property,
                value,
                reason: "value is not finite".to_string(),
            });
        }
        match property {
            CameraProperty::Exposure => Ok(self.exposure.set(value)),
            CameraProperty::Fps => Ok(self.fps.set(value)),
            CameraProperty::Gain => Err(CameraError::UnsupportedProperty(property)),
        }
    }

    fn property_range(&self, property: CameraProperty) -> CameraResult<PropertyRange> {
        self.property(property).map(|state| state.range)
    }
}
