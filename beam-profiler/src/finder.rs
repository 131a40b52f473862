//! Beam localisation stage.
//!
//! In auto mode the beam is located from image moments on every frame and
//! the ROI size is twice the 4-sigma diameters times the scale factor,
//! clamped to the frame. In manual mode position, size and (optionally)
//! angle come from [`BeamFinder::set_parameter`] or
//! [`BeamFinder::apply_manual_state`]. Extraction always runs and samples
//! the intensity frame, never the denoised copy used for locating.

use crate::callback::EventBus;
use crate::config::BeamFinderConfig;
use crate::stage::{Stage, StageContext, StageOutput, StageParameter};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use shared::image_proc::{
    noise_level_from_histogram, rotate_sub_image, threshold_to_zero, width_by_moments,
};
use std::f64::consts::FRAC_PI_4;
use strum::{Display, EnumDiscriminants, EnumIter, EnumString};

/// Located beam geometry in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeamState {
    pub position: (f64, f64),
    /// ROI size, never negative
    pub size: (f64, f64),
    /// Radians, within ±π/4
    pub angle: f64,
}

impl BeamState {
    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }
}

/// Finder parameters addressable by kind.
#[derive(Debug, Clone, Copy, PartialEq, EnumDiscriminants)]
#[strum_discriminants(
    name(FinderParameterKind),
    derive(Display, EnumIter, EnumString, Hash),
    strum(serialize_all = "snake_case")
)]
pub enum FinderParameter {
    Shape((f64, f64)),
    Position((f64, f64)),
    Angle(f64),
    Scale(f64),
    NoiseLevel(f64),
    FindAuto(bool),
    RotationEnable(bool),
    DeleteNoise(bool),
    ManualRotation(bool),
}

pub struct BeamFinder {
    enabled: bool,
    config: BeamFinderConfig,
    beam_state: EventBus<BeamState>,
}

impl Default for BeamFinder {
    fn default() -> Self {
        Self::new(BeamFinderConfig::default())
    }
}

impl BeamFinder {
    pub fn new(config: BeamFinderConfig) -> Self {
        Self {
            enabled: true,
            config,
            beam_state: EventBus::new(),
        }
    }

    pub fn config(&self) -> &BeamFinderConfig {
        &self.config
    }

    /// Bus fired once per processed frame in auto mode.
    pub fn beam_state_events(&self) -> &EventBus<BeamState> {
        &self.beam_state
    }

    /// Geometry used for the next extraction.
    pub fn state(&self) -> BeamState {
        BeamState {
            position: self.config.position,
            size: self.config.shape,
            angle: self.effective_angle(),
        }
    }

    fn effective_angle(&self) -> f64 {
        if self.config.rotation_enable {
            self.config.angle
        } else {
            0.0
        }
    }

    /// Current value of one parameter.
    pub fn parameter(&self, kind: FinderParameterKind) -> FinderParameter {
        let c = &self.config;
        match kind {
            FinderParameterKind::Shape => FinderParameter::Shape(c.shape),
            FinderParameterKind::Position => FinderParameter::Position(c.position),
            FinderParameterKind::Angle => FinderParameter::Angle(c.angle),
            FinderParameterKind::Scale => FinderParameter::Scale(c.scale),
            FinderParameterKind::NoiseLevel => FinderParameter::NoiseLevel(c.noise_level),
            FinderParameterKind::FindAuto => FinderParameter::FindAuto(c.find_auto),
            FinderParameterKind::RotationEnable => FinderParameter::RotationEnable(c.rotation_enable),
            FinderParameterKind::DeleteNoise => FinderParameter::DeleteNoise(c.delete_noise),
            FinderParameterKind::ManualRotation => FinderParameter::ManualRotation(c.manual_rotation),
        }
    }

    /// Apply a parameter update, returning whether it took effect.
    ///
    /// Shape and position are only writable in manual mode and the angle only
    /// with manual rotation enabled; other writes are ignored.
    pub fn update(&mut self, parameter: FinderParameter) -> bool {
        let c = &mut self.config;
        match parameter {
            FinderParameter::Shape((w, h)) if !c.find_auto => {
                c.shape = (w.max(0.0), h.max(0.0));
            }
            FinderParameter::Position(position) if !c.find_auto => c.position = position,
            FinderParameter::Angle(angle) if c.manual_rotation && angle.is_finite() => {
                c.angle = angle.clamp(-FRAC_PI_4, FRAC_PI_4);
            }
            FinderParameter::Scale(scale) if scale.is_finite() && scale >= 0.0 => c.scale = scale,
            FinderParameter::NoiseLevel(level) if level.is_finite() => c.noise_level = level.max(0.0),
            FinderParameter::FindAuto(flag) => c.find_auto = flag,
            FinderParameter::RotationEnable(flag) => c.rotation_enable = flag,
            FinderParameter::DeleteNoise(flag) => c.delete_noise = flag,
            FinderParameter::ManualRotation(flag) => c.manual_rotation = flag,
            rejected => {
                log::debug!("finder parameter {rejected:?} ignored");
                return false;
            }
        }
        true
    }

    /// Manual beam geometry from an external source.
    ///
    /// Ignored in auto mode. The angle is taken only when both rotation and
    /// manual rotation are enabled.
    pub fn apply_manual_state(&mut self, state: BeamState) -> bool {
        if self.config.find_auto {
            return false;
        }
        self.config.position = state.position;
        self.config.shape = (state.size.0.max(0.0), state.size.1.max(0.0));
        if self.config.rotation_enable && self.config.manual_rotation {
            self.config.angle = state.angle.clamp(-FRAC_PI_4, FRAC_PI_4);
        }
        true
    }

    /// Locate the beam in `image` without changing the finder state.
    pub fn locate(&self, image: &ArrayView2<f64>) -> BeamState {
        let (rows, cols) = image.dim();
        let c = &self.config;

        let geometry = if c.delete_noise {
            let level = if c.noise_level > 0.0 {
                c.noise_level
            } else {
                noise_level_from_histogram(image)
            };
            width_by_moments(&threshold_to_zero(image, level).view(), c.rotation_enable)
        } else {
            width_by_moments(image, c.rotation_enable)
        };

        let width = (2.0 * c.scale * geometry.width).min(cols as f64);
        let height = (2.0 * c.scale * geometry.height).min(rows as f64);
        let angle = match (c.rotation_enable, c.manual_rotation) {
            (true, false) => geometry.angle,
            (true, true) => c.angle,
            (false, _) => 0.0,
        };

        BeamState {
            position: geometry.center(),
            size: (width, height),
            angle,
        }
    }
}

impl Stage for BeamFinder {
    fn name(&self) -> &str {
        "BeamFinder"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn process(&mut self, image: &ArrayView2<f64>, _context: &StageContext) -> Option<StageOutput> {
        if self.config.find_auto {
            if image.is_empty() {
                return None;
            }
            let located = self.locate(image);
            self.config.position = located.position;
            self.config.shape = located.size;
            if self.config.rotation_enable {
                self.config.angle = located.angle;
            }
            self.beam_state.emit(&located);
        }

        let state = self.state();
        let roi = rotate_sub_image(
            image,
            state.position,
            state.size.0,
            state.size.1,
            state.angle,
        );

        Some(StageOutput {
            image: roi.image,
            context: StageContext {
                angle: Some(state.angle),
                position: Some(state.position),
                size: Some(state.size),
                placement: Some(roi.placement),
            },
        })
    }

    fn set_parameter(&mut self, parameter: &StageParameter) -> bool {
        match parameter {
            StageParameter::Finder(parameter) => self.update(*parameter),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use shared::synthetic::{add_uniform_noise, gaussian_beam, uniform_block};
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    fn block_frame() -> Array2<f64> {
        uniform_block(100, 100, (50.0, 50.0), 20, 200.0)
    }

    #[test]
    fn test_blank_frame_is_centred_and_empty() {
        let mut finder = BeamFinder::default();
        let frame = Array2::<f64>::zeros((60, 80));

        let output = finder
            .process(&frame.view(), &StageContext::default())
            .unwrap();
        let state = finder.state();
        assert_eq!(state.position, (40.0, 30.0));
        assert_eq!(state.size, (0.0, 0.0));
        assert_eq!(state.angle, 0.0);
        assert!(output.image.is_empty());
    }

    #[test]
    fn test_block_roi_is_twice_four_sigma() {
        let mut finder = BeamFinder::default();
        let output = finder
            .process(&block_frame().view(), &StageContext::default())
            .unwrap();

        let state = finder.state();
        let four_sigma = 4.0 * (399.0_f64 / 12.0).sqrt();
        assert_relative_eq!(state.position.0, 49.5, epsilon = 1e-9);
        assert_relative_eq!(state.position.1, 49.5, epsilon = 1e-9);
        assert_relative_eq!(state.size.0, 2.0 * four_sigma, epsilon = 1e-9);

        assert_eq!(output.image.dim(), (46, 46));
        let placement = output.context.placement.unwrap();
        assert_eq!(placement.origin, (26.0, 26.0));
        assert_eq!(output.image.sum(), 200.0 * 400.0);
    }

    #[test]
    fn test_scale_is_clamped_to_frame() {
        let mut finder = BeamFinder::default();
        assert!(finder.update(FinderParameter::Scale(10.0)));
        let output = finder
            .process(&block_frame().view(), &StageContext::default())
            .unwrap();
        assert_eq!(finder.state().size, (100.0, 100.0));
        // Upper crop bound truncates 49.5 + 50 to 99
        assert_eq!(output.image.dim(), (99, 99));
    }

    #[test]
    fn test_rotated_beam_extracts_requested_shape() {
        let angle = 20.0_f64.to_radians();
        let frame = gaussian_beam(200, 200, (100.0, 100.0), (12.0, 5.0), angle, 1000.0);
        let mut finder = BeamFinder::default();
        finder.update(FinderParameter::RotationEnable(true));

        let output = finder
            .process(&frame.view(), &StageContext::default())
            .unwrap();
        let state = finder.state();
        assert_relative_eq!(state.angle, angle, epsilon = 1e-3);
        assert_eq!(
            output.image.dim(),
            (state.size.1 as usize, state.size.0 as usize)
        );
        assert_relative_eq!(output.context.angle.unwrap(), angle, epsilon = 1e-3);
    }

    #[test]
    fn test_manual_geometry_only_outside_auto_mode() {
        let mut finder = BeamFinder::default();
        assert!(!finder.update(FinderParameter::Shape((10.0, 10.0))));
        assert!(!finder.update(FinderParameter::Position((5.0, 5.0))));

        finder.update(FinderParameter::FindAuto(false));
        assert!(finder.update(FinderParameter::Shape((10.0, 20.0))));
        assert!(finder.update(FinderParameter::Position((50.0, 50.0))));

        let output = finder
            .process(&block_frame().view(), &StageContext::default())
            .unwrap();
        assert_eq!(output.image.dim(), (20, 10));
        assert_eq!(
            finder.parameter(FinderParameterKind::Shape),
            FinderParameter::Shape((10.0, 20.0))
        );
    }

    #[test]
    fn test_manual_angle_requires_manual_rotation_and_is_clamped() {
        let mut finder = BeamFinder::default();
        assert!(!finder.update(FinderParameter::Angle(0.3)));

        finder.update(FinderParameter::ManualRotation(true));
        assert!(finder.update(FinderParameter::Angle(2.0)));
        assert_eq!(
            finder.parameter(FinderParameterKind::Angle),
            FinderParameter::Angle(FRAC_PI_4)
        );
    }

    #[test]
    fn test_manual_state_ignored_in_auto_mode() {
        let mut finder = BeamFinder::default();
        let manual = BeamState {
            position: (10.0, 12.0),
            size: (4.0, -3.0),
            angle: 0.5,
        };
        assert!(!finder.apply_manual_state(manual));

        finder.update(FinderParameter::FindAuto(false));
        finder.update(FinderParameter::RotationEnable(true));
        finder.update(FinderParameter::ManualRotation(true));
        assert!(finder.apply_manual_state(manual));
        assert_eq!(finder.state().size, (4.0, 0.0));
        assert_eq!(finder.state().angle, 0.5);
    }

    #[test]
    fn test_delete_noise_suppresses_background() {
        let mut frame = block_frame();
        add_uniform_noise(&mut frame, 3.0, 7);
        let frame = frame.mapv(f64::round);

        let mut finder = BeamFinder::default();
        let noisy = finder.locate(&frame.view());
        finder.update(FinderParameter::DeleteNoise(true));
        finder.update(FinderParameter::NoiseLevel(3.0));
        let cleaned = finder.locate(&frame.view());

        assert!(cleaned.size.0 < noisy.size.0);
        assert_relative_eq!(cleaned.position.0, 49.5, epsilon = 0.5);
    }

    #[test]
    fn test_beam_state_emitted_only_in_auto_mode() {
        let mut finder = BeamFinder::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        finder
            .beam_state_events()
            .subscribe(move |state: &BeamState| seen_clone.lock().unwrap().push(*state));

        finder.process(&block_frame().view(), &StageContext::default());
        finder.update(FinderParameter::FindAuto(false));
        finder.process(&block_frame().view(), &StageContext::default());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_relative_eq!(seen[0].position.0, 49.5, epsilon = 1e-9);
    }

    #[test]
    fn test_parameter_kind_names() {
        assert_eq!(FinderParameterKind::NoiseLevel.to_string(), "noise_level");
        assert_eq!(
            FinderParameterKind::from_str("manual_rotation").unwrap(),
            FinderParameterKind::ManualRotation
        );
    }
}
