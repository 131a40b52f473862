//! Pipeline configuration

use serde::{Deserialize, Serialize};
use shared::beam_parameters::{OtherParameter, ParameterGroup, PositionKind, WidthMethod};
use shared::image_proc::{PowerLevelSearch, DEFAULT_MAX_ITERATIONS};
use std::collections::BTreeSet;
use std::fmt;
use strum::IntoEnumIterator;

/// Beam finder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamFinderConfig {
    /// Locate the beam from image moments on every frame
    pub find_auto: bool,
    /// Threshold the frame at the noise level before locating
    pub delete_noise: bool,
    /// Estimate and apply the beam orientation
    pub rotation_enable: bool,
    /// Keep a user-set angle instead of the estimated one
    pub manual_rotation: bool,
    /// ROI size multiplier applied to twice the 4-sigma diameters
    pub scale: f64,
    /// Fixed noise level; 0 selects the histogram mode of each frame
    pub noise_level: f64,
    /// Manual ROI centre `(x, y)` in frame pixels
    pub position: (f64, f64),
    /// Manual ROI size `(width, height)` in pixels
    pub shape: (f64, f64),
    /// Manual ROI angle in radians
    pub angle: f64,
}

impl Default for BeamFinderConfig {
    fn default() -> Self {
        Self {
            find_auto: true,
            delete_noise: false,
            rotation_enable: false,
            manual_rotation: false,
            scale: 1.0,
            noise_level: 0.0,
            position: (0.0, 0.0),
            shape: (0.0, 0.0),
            angle: 0.0,
        }
    }
}

/// A quantity the profiler can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Calculation {
    Width(WidthMethod),
    Position(PositionKind),
    Other(OtherParameter),
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calculation::Width(method) => write!(f, "{}: {method}", ParameterGroup::BeamWidth),
            Calculation::Position(kind) => {
                write!(f, "{}: {kind}", ParameterGroup::PositionOrientation)
            }
            Calculation::Other(parameter) => write!(f, "{}: {parameter}", ParameterGroup::Other),
        }
    }
}

impl Calculation {
    /// Every calculation the profiler supports.
    pub fn all() -> impl Iterator<Item = Calculation> {
        WidthMethod::iter()
            .map(Calculation::Width)
            .chain(PositionKind::iter().map(Calculation::Position))
            .chain(OtherParameter::iter().map(Calculation::Other))
    }
}

/// Beam profiler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamProfilerConfig {
    /// Enabled calculations; disabled ones are skipped entirely
    pub calculations: BTreeSet<Calculation>,
    /// Follow the 4-sigma centre for cross sections
    pub cross_sections_auto: bool,
    /// Cross-section centre used when `cross_sections_auto` is off
    pub cross_section_center: (f64, f64),
    /// Physical pixel size applied to widths, axes and global position
    pub pixel_size: f64,
    pub power_search: PowerLevelSearch,
    pub gauss_max_iterations: usize,
}

impl Default for BeamProfilerConfig {
    fn default() -> Self {
        Self {
            calculations: Calculation::all().collect(),
            cross_sections_auto: true,
            cross_section_center: (0.0, 0.0),
            pixel_size: 1.0,
            power_search: PowerLevelSearch::default(),
            gauss_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl BeamProfilerConfig {
    pub fn is_enabled(&self, calculation: Calculation) -> bool {
        self.calculations.contains(&calculation)
    }

    pub fn width_enabled(&self, method: WidthMethod) -> bool {
        self.is_enabled(Calculation::Width(method))
    }

    pub fn position_enabled(&self, kind: PositionKind) -> bool {
        self.is_enabled(Calculation::Position(kind))
    }

    pub fn other_enabled(&self, parameter: OtherParameter) -> bool {
        self.is_enabled(Calculation::Other(parameter))
    }

    pub fn set_enabled(&mut self, calculation: Calculation, enabled: bool) {
        if enabled {
            self.calculations.insert(calculation);
        } else {
            self.calculations.remove(&calculation);
        }
    }
}

/// Complete two-stage pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub finder_enabled: bool,
    pub profiler_enabled: bool,
    pub finder: BeamFinderConfig,
    pub profiler: BeamProfilerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            finder_enabled: true,
            profiler_enabled: true,
            finder: BeamFinderConfig::default(),
            profiler: BeamProfilerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_calculations_enabled_by_default() {
        let config = BeamProfilerConfig::default();
        assert_eq!(config.calculations.len(), 9);
        assert!(config.width_enabled(WidthMethod::PowerLevel));
        assert!(config.position_enabled(PositionKind::Angle));
        assert!(config.other_enabled(OtherParameter::Area));
    }

    #[test]
    fn test_toggle_calculation() {
        let mut config = BeamProfilerConfig::default();
        config.set_enabled(Calculation::Width(WidthMethod::GaussApproximation), false);
        assert!(!config.width_enabled(WidthMethod::GaussApproximation));
        config.set_enabled(Calculation::Width(WidthMethod::GaussApproximation), true);
        assert!(config.width_enabled(WidthMethod::GaussApproximation));
    }

    #[test]
    fn test_calculation_display_uses_group_prefix() {
        assert_eq!(
            Calculation::Width(WidthMethod::FourSigma).to_string(),
            "Beam Width: 4 Sigma"
        );
        assert_eq!(
            Calculation::Other(OtherParameter::Power).to_string(),
            "Other Parameters: Power"
        );
    }

    #[test]
    fn test_finder_defaults() {
        let config = BeamFinderConfig::default();
        assert!(config.find_auto);
        assert!(!config.delete_noise);
        assert!(!config.rotation_enable);
        assert!(!config.manual_rotation);
        assert_eq!(config.scale, 1.0);
    }
}
