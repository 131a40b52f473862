//! Per-frame intensity verdicts.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Verdict of one controller check.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerStatus {
    /// Controller inactive
    #[default]
    None,
    /// Peak inside the target band
    Ok,
    /// Check could not be evaluated
    NotOk,
    /// Peak above the band
    High,
    /// Peak below the band
    Low,
    /// A run-once correction is in progress
    Running,
    /// Property saturated at its maximum and still too dark
    BadLow,
    /// Property saturated at its minimum and still too bright
    BadHigh,
}

impl ControllerStatus {
    /// True for the terminal verdicts that need no further adjustment.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ok | Self::BadLow | Self::BadHigh)
    }
}

/// Classifies the brightest pixel of a frame against a target band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakChecker {
    pub min: f64,
    pub max: f64,
}

impl Default for PeakChecker {
    fn default() -> Self {
        Self {
            min: 190.0,
            max: 240.0,
        }
    }
}

impl PeakChecker {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn classify(&self, peak: f64) -> ControllerStatus {
        if peak < self.min {
            ControllerStatus::Low
        } else if peak > self.max {
            ControllerStatus::High
        } else {
            ControllerStatus::Ok
        }
    }

    /// Peak of `image` (0 when empty) and its verdict.
    pub fn check(&self, image: &ArrayView2<f64>) -> (f64, ControllerStatus) {
        let peak = image.iter().copied().fold(0.0, f64::max);
        (peak, self.classify(peak))
    }
}
