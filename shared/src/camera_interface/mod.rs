//! Camera interface shared by drivers, acquisition and exposure control.
//!
//! Drivers implement [`CameraInterface`]. Components that only need to read
//! and write camera properties depend on [`PropertyAccess`], implemented by
//! [`PropertyController`] over a lock-guarded [`SharedCamera`] handle.

pub mod mock;
pub mod property_controller;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::frame::Frame;
use crate::image_size::ImageSize;

pub use property_controller::{share_camera, PropertyAccess, PropertyController, SharedCamera};

/// Errors reported by camera drivers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    /// Operation needs an opened camera
    #[error("camera is not opened")]
    NotOpened,

    /// Frame capture failed
    #[error("capture failed: {0}")]
    CaptureError(String),

    /// The driver does not expose this property
    #[error("property {0} is not supported")]
    UnsupportedProperty(CameraProperty),

    /// The driver rejected a property write
    #[error("camera rejected {property} = {value}: {reason}")]
    PropertyRejected {
        property: CameraProperty,
        value: f64,
        reason: String,
    },

    /// Invalid driver configuration
    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// Controllable camera properties.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CameraProperty {
    Exposure,
    Gain,
    Fps,
}

/// Addressable range of a property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl PropertyRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Stored value of a driver-side property, clamped on write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyState {
    pub range: PropertyRange,
    pub value: f64,
}

impl PropertyState {
    pub fn new(range: PropertyRange, value: f64) -> Self {
        Self {
            range,
            value: range.clamp(value),
        }
    }

    /// Store `value` clamped to the range and return what was stored.
    pub fn set(&mut self, value: f64) -> f64 {
        self.value = self.range.clamp(value);
        self.value
    }
}

/// Camera driver contract.
///
/// `query_frame` must not block longer than a short driver timeout; `Ok(None)`
/// means no frame was ready.
pub trait CameraInterface: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> CameraResult<()>;

    fn close(&mut self) -> CameraResult<()>;

    fn start(&mut self) -> CameraResult<()>;

    fn stop(&mut self) -> CameraResult<()>;

    fn is_opened(&self) -> bool;

    fn query_frame(&mut self) -> CameraResult<Option<Frame>>;

    fn frame_size(&self) -> ImageSize;

    /// Physical size of a pixel, in the unit widths are reported in.
    fn pixel_size(&self) -> f64;

    fn has_property(&self, property: CameraProperty) -> bool;

    fn property_value(&self, property: CameraProperty) -> CameraResult<f64>;

    /// Write a property; values outside the range are clamped. Returns the
    /// value actually applied.
    fn set_property_value(&mut self, property: CameraProperty, value: f64) -> CameraResult<f64>;

    fn property_range(&self, property: CameraProperty) -> CameraResult<PropertyRange>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_property_names_round_trip() {
        assert_eq!(CameraProperty::Exposure.to_string(), "exposure");
        assert_eq!(CameraProperty::from_str("fps"), Ok(CameraProperty::Fps));
        assert!(CameraProperty::from_str("focus").is_err());
    }

    #[test]
    fn test_property_state_clamps() {
        let mut state = PropertyState::new(PropertyRange::new(1.0, 255.0, 0.1), 400.0);
        assert_eq!(state.value, 255.0);
        assert_eq!(state.set(-3.0), 1.0);
        assert_eq!(state.set(42.0), 42.0);
        assert!(state.range.contains(42.0));
        assert_eq!(state.range.span(), 254.0);
    }
}
