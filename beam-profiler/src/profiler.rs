//! Beam metrology stage.
//!
//! Runs on the ROI handed over by the finder (or a whole frame when used on
//! its own) and rebuilds a [`BeamParameters`] value per frame containing only
//! the enabled calculations. Widths and cross-section axes are scaled by the
//! pixel size; the local position stays in ROI pixels.

use crate::callback::EventBus;
use crate::config::{BeamProfilerConfig, Calculation};
use crate::stage::{Stage, StageContext, StageOutput, StageParameter};
use ndarray::{Array1, ArrayView2};
use shared::beam_parameters::{
    BeamParameters, OtherParameter, ParameterValue, PositionKind, WidthMethod,
};
use shared::camera_interface::PropertyAccess;
use shared::image_proc::{
    cross_section, fit_gaussian, power_area, remove_background, width_by_level,
    width_by_moments, width_by_power_level, BeamGeometry, GaussParams, DEFAULT_INTENSITY_LEVEL,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfilerParameter {
    Calculation(Calculation, bool),
    CrossSectionsAuto(bool),
    /// Cross-section centre in ROI pixels, used when auto centring is off
    CrossSectionCenter((f64, f64)),
    PixelSize(f64),
    PowerSearchBudget(Duration),
}

/// Row and column through the beam centre with their fitted models.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSections {
    /// Positions centred at zero, in physical units
    pub x_axis: Array1<f64>,
    pub x_profile: Array1<f64>,
    pub y_axis: Array1<f64>,
    pub y_profile: Array1<f64>,
    /// Gaussian models sampled on the axes when the fit is enabled
    pub x_model: Option<Array1<f64>>,
    pub y_model: Option<Array1<f64>>,
}

fn centered_axis(len: usize, pixel_size: f64) -> Array1<f64> {
    let middle = len as f64 / 2.0;
    Array1::from_shape_fn(len, |i| (i as f64 - middle) * pixel_size)
}

pub struct BeamProfiler {
    enabled: bool,
    config: BeamProfilerConfig,
    properties: Option<Arc<dyn PropertyAccess>>,
    center: (f64, f64),
    parameter_names: Vec<String>,
    parameters: EventBus<BeamParameters>,
    cross_sections: EventBus<CrossSections>,
    available_parameters: EventBus<Vec<String>>,
}

impl Default for BeamProfiler {
    fn default() -> Self {
        Self::new(BeamProfilerConfig::default())
    }
}

impl BeamProfiler {
    pub fn new(config: BeamProfilerConfig) -> Self {
        Self {
            enabled: true,
            center: config.cross_section_center,
            config,
            properties: None,
            parameter_names: Vec::new(),
            parameters: EventBus::new(),
            cross_sections: EventBus::new(),
            available_parameters: EventBus::new(),
        }
    }

    /// Take the pixel size from the camera while it is open.
    pub fn with_properties(mut self, properties: Arc<dyn PropertyAccess>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn config(&self) -> &BeamProfilerConfig {
        &self.config
    }

    /// Cross-section centre used for the last frame, in ROI pixels.
    pub fn center(&self) -> (f64, f64) {
        self.center
    }

    pub fn parameter_events(&self) -> &EventBus<BeamParameters> {
        &self.parameters
    }

    pub fn cross_section_events(&self) -> &EventBus<CrossSections> {
        &self.cross_sections
    }

    /// Fired whenever the set of produced parameter names changes.
    pub fn available_parameter_events(&self) -> &EventBus<Vec<String>> {
        &self.available_parameters
    }

    fn pixel_size(&self) -> f64 {
        match &self.properties {
            Some(properties) if properties.available() => properties.pixel_size(),
            _ => self.config.pixel_size,
        }
    }

    pub fn update(&mut self, parameter: ProfilerParameter) -> bool {
        match parameter {
            ProfilerParameter::Calculation(calculation, enabled) => {
                self.config.set_enabled(calculation, enabled)
            }
            ProfilerParameter::CrossSectionsAuto(flag) => self.config.cross_sections_auto = flag,
            ProfilerParameter::CrossSectionCenter(center) => {
                self.config.cross_section_center = center;
            }
            ProfilerParameter::PixelSize(size) if size.is_finite() && size > 0.0 => {
                self.config.pixel_size = size;
            }
            ProfilerParameter::PowerSearchBudget(budget) => {
                self.config.power_search.time_budget = budget;
            }
            rejected => {
                log::debug!("profiler parameter {rejected:?} ignored");
                return false;
            }
        }
        true
    }

    /// Compute the enabled parameters of `image`.
    ///
    /// `image` is expected to be background-free already.
    fn measure(
        &self,
        image: &ArrayView2<f64>,
        context: &StageContext,
    ) -> (BeamParameters, CrossSections, (f64, f64)) {
        let config = &self.config;
        let (rows, cols) = image.dim();
        let pixel = self.pixel_size();
        let mut result = BeamParameters::default();

        let four_sigma: Option<BeamGeometry> = config
            .width_enabled(WidthMethod::FourSigma)
            .then(|| width_by_moments(image, false));
        if let Some(geometry) = &four_sigma {
            result.widths.insert(
                WidthMethod::FourSigma,
                ParameterValue::Pair(geometry.width * pixel, geometry.height * pixel),
            );
        }

        let center = if !config.cross_sections_auto {
            config.cross_section_center
        } else if let Some(geometry) = &four_sigma {
            geometry.center()
        } else {
            (cols as f64 / 2.0, rows as f64 / 2.0)
        };

        let (x_profile, y_profile) = cross_section(image, center.0, center.1);
        let mut sections = CrossSections {
            x_axis: centered_axis(x_profile.len(), pixel),
            y_axis: centered_axis(y_profile.len(), pixel),
            x_profile,
            y_profile,
            x_model: None,
            y_model: None,
        };

        if config.width_enabled(WidthMethod::GaussApproximation) {
            let (seed_x, seed_y) = four_sigma
                .map(|g| (g.width * pixel, g.height * pixel))
                .unwrap_or((
                    sections.x_profile.len() as f64 / 2.0 * pixel,
                    sections.y_profile.len() as f64 / 2.0 * pixel,
                ));
            let fit_x = fit_gaussian(
                &sections.x_axis.view(),
                &sections.x_profile.view(),
                Some(GaussParams::from_diameter(seed_x)),
                config.gauss_max_iterations,
            );
            let fit_y = fit_gaussian(
                &sections.y_axis.view(),
                &sections.y_profile.view(),
                Some(GaussParams::from_diameter(seed_y)),
                config.gauss_max_iterations,
            );
            result.widths.insert(
                WidthMethod::GaussApproximation,
                ParameterValue::Pair(fit_x.diameter(), fit_y.diameter()),
            );
            sections.x_model = Some(fit_x.model(&sections.x_axis.view()));
            sections.y_model = Some(fit_y.model(&sections.y_axis.view()));
        }

        if config.width_enabled(WidthMethod::IntensityLevel) {
            result.widths.insert(
                WidthMethod::IntensityLevel,
                ParameterValue::Pair(
                    width_by_level(&sections.x_profile.view(), DEFAULT_INTENSITY_LEVEL) * pixel,
                    width_by_level(&sections.y_profile.view(), DEFAULT_INTENSITY_LEVEL) * pixel,
                ),
            );
        }

        let want_power = config.other_enabled(OtherParameter::Power);
        let want_area = config.other_enabled(OtherParameter::Area);
        let power_level = config.width_enabled(WidthMethod::PowerLevel);
        if want_power || want_area || power_level {
            let (power, area) = power_area(image);
            if want_power {
                result.other.insert(OtherParameter::Power, power);
            }
            if want_area {
                result.other.insert(OtherParameter::Area, area);
            }
            if power_level {
                let width = width_by_power_level(
                    image,
                    &config.power_search,
                    four_sigma.map(|g| g.center()),
                    Some(power),
                );
                result.widths.insert(
                    WidthMethod::PowerLevel,
                    ParameterValue::Scalar(width.diameter * pixel),
                );
            }
        }

        if config.position_enabled(PositionKind::Global) {
            let (x, y) = context.placement.unwrap_or_default().to_frame(center.0, center.1);
            result
                .position
                .insert(PositionKind::Global, ParameterValue::Pair(x * pixel, y * pixel));
        }
        if config.position_enabled(PositionKind::Local) {
            result
                .position
                .insert(PositionKind::Local, ParameterValue::Pair(center.0, center.1));
        }
        if config.position_enabled(PositionKind::Angle) {
            if let Some(angle) = context.angle {
                result
                    .position
                    .insert(PositionKind::Angle, ParameterValue::Scalar(angle.to_degrees()));
            }
        }

        (result, sections, center)
    }
}

impl Stage for BeamProfiler {
    fn name(&self) -> &str {
        "BeamProfiler"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn process(&mut self, image: &ArrayView2<f64>, context: &StageContext) -> Option<StageOutput> {
        if image.is_empty() {
            log::trace!("empty ROI, nothing to profile");
            return None;
        }

        let denoised = remove_background(image);
        let (parameters, sections, center) = self.measure(&denoised.view(), context);
        self.center = center;

        self.cross_sections.emit(&sections);
        self.parameters.emit(&parameters);

        let names = parameters.parameter_names();
        if names != self.parameter_names {
            self.parameter_names = names;
            self.available_parameters.emit(&self.parameter_names);
        }

        Some(StageOutput {
            image: denoised,
            context: *context,
        })
    }

    fn set_parameter(&mut self, parameter: &StageParameter) -> bool {
        match parameter {
            StageParameter::Profiler(parameter) => self.update(*parameter),
            _ => false,
        }
    }
}
