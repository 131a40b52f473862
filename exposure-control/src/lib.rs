//! Automatic exposure correction.
//!
//! An [`ExposureController`] watches the brightest pixel of incoming frames
//! and drives one camera property through [`PropertyAccess`] until the peak
//! sits inside a target band.
//!
//! [`PropertyAccess`]: shared::camera_interface::PropertyAccess

pub mod controller;
pub mod range_analyzer;
pub mod status;

pub use controller::{ControlError, ControllerConfig, ExposureController};
pub use range_analyzer::{RangeAnalyzer, RangeStep, DEFAULT_CONTROL_POINTS};
pub use status::{ControllerStatus, PeakChecker};
