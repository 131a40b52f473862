//! Closed-loop correction of one camera property from frame peaks.
//!
//! Two modes share one stepping rule:
//!
//! * **always** nudges the property by one step per frame toward the band
//!   until it is in band or saturated at a range end.
//! * **run-once** first brackets the working range with a
//!   [`RangeAnalyzer`], then bisects the bracket and finally falls back to
//!   stepping once the bracket is only a few steps wide. It finishes after
//!   `max_counter + 1` consecutive settled checks.

use crate::range_analyzer::{RangeAnalyzer, RangeStep, DEFAULT_CONTROL_POINTS};
use crate::status::{ControllerStatus, PeakChecker};
use beam_profiler::EventBus;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use shared::camera_interface::{CameraProperty, PropertyAccess, PropertyRange};
use shared::Frame;
use std::sync::Arc;
use thiserror::Error;

const FALLBACK_STEP: f64 = 0.1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// No camera open, or the camera lacks the controlled property
    #[error("property {0} is not available")]
    PropertyUnavailable(CameraProperty),

    #[error("invalid target band [{min}, {max}]")]
    InvalidTarget { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub property: CameraProperty,
    pub target_min: f64,
    pub target_max: f64,
    /// Run-once control finishes after `max_counter + 1` settled checks
    pub max_counter: u32,
    /// Adjustment step, the property's own step when unset
    pub step: Option<f64>,
    pub control_always: bool,
    pub control_points: usize,
    /// Bisection hands over to stepping below this many steps of bracket
    pub small_range_steps: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            property: CameraProperty::Exposure,
            target_min: 190.0,
            target_max: 240.0,
            max_counter: 3,
            step: None,
            control_always: false,
            control_points: DEFAULT_CONTROL_POINTS,
            small_range_steps: 10.0,
        }
    }
}

#[derive(Debug)]
enum ControlPhase {
    Idle,
    Discovery(RangeAnalyzer),
    Bisection { low: f64, high: f64 },
}

pub struct ExposureController {
    config: ControllerConfig,
    properties: Arc<dyn PropertyAccess>,
    checker: PeakChecker,
    active: bool,
    phase: ControlPhase,
    counter: u32,
    range: Option<PropertyRange>,
    step: f64,
    status: EventBus<ControllerStatus>,
}

impl ExposureController {
    pub fn new(config: ControllerConfig, properties: Arc<dyn PropertyAccess>) -> Self {
        Self {
            checker: PeakChecker::new(config.target_min, config.target_max),
            step: config.step.unwrap_or(FALLBACK_STEP),
            config,
            properties,
            active: true,
            phase: ControlPhase::Idle,
            counter: 0,
            range: None,
            status: EventBus::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Emits the verdict of every evaluated frame.
    pub fn status_events(&self) -> &EventBus<ControllerStatus> {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True while a run-once correction is in progress.
    pub fn is_running(&self) -> bool {
        !matches!(self.phase, ControlPhase::Idle)
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Enable or disable frame checks. Disabling stops any correction.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            self.stop_control();
            self.status.emit(&ControllerStatus::None);
        }
    }

    pub fn set_target(&mut self, min: f64, max: f64) -> Result<(), ControlError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(ControlError::InvalidTarget { min, max });
        }
        self.config.target_min = min;
        self.config.target_max = max;
        self.checker = PeakChecker::new(min, max);
        Ok(())
    }

    /// Switch continuous stepping. Turning it on also runs one full correction.
    ///
    /// Ignored while the controller is inactive.
    pub fn set_control_always(&mut self, enabled: bool) -> Result<(), ControlError> {
        if !self.active {
            return Ok(());
        }
        self.config.control_always = enabled;
        if enabled && !self.is_running() {
            self.start_control()?;
        }
        Ok(())
    }

    fn refresh_range(&mut self) -> Result<PropertyRange, ControlError> {
        let property = self.config.property;
        if !self.properties.available() || !self.properties.has_property(property) {
            return Err(ControlError::PropertyUnavailable(property));
        }
        let range = self
            .properties
            .property_range(property)
            .ok_or(ControlError::PropertyUnavailable(property))?;

        self.step = match self.config.step {
            Some(step) if step > 0.0 => step,
            _ if range.step > 0.0 => range.step,
            _ => FALLBACK_STEP,
        };
        self.range = Some(range);
        Ok(range)
    }

    /// Begin a run-once correction from the property's current value.
    pub fn start_control(&mut self) -> Result<(), ControlError> {
        let property = self.config.property;
        let range = self.refresh_range()?;
        let current = self
            .properties
            .property_value(property)
            .ok_or(ControlError::PropertyUnavailable(property))?;

        self.counter = 0;
        self.phase = ControlPhase::Discovery(RangeAnalyzer::new(
            range,
            current,
            self.config.control_points,
        ));
        log::info!(
            "{property} control started at {current} in [{}, {}] step {}",
            range.min,
            range.max,
            self.step
        );
        Ok(())
    }

    /// Halt a run-once correction, leaving the property where it is.
    pub fn stop_control(&mut self) {
        if self.is_running() {
            log::info!("{} control stopped", self.config.property);
        }
        self.phase = ControlPhase::Idle;
        self.counter = 0;
    }

    /// Start when idle, stop when running. Returns whether control now runs.
    pub fn toggle_control(&mut self) -> Result<bool, ControlError> {
        if self.is_running() {
            self.stop_control();
        } else {
            self.start_control()?;
        }
        Ok(self.is_running())
    }

    pub fn check_frame(&mut self, frame: &Frame) -> ControllerStatus {
        self.check_peak(frame.max_value())
    }

    pub fn check_image(&mut self, image: &ArrayView2<f64>) -> ControllerStatus {
        let (peak, _) = self.checker.check(image);
        self.check_peak(peak)
    }

    /// Evaluate one frame peak, adjust the property if needed and emit the
    /// resulting status. Inactive controllers return [`ControllerStatus::None`]
    /// without emitting.
    pub fn check_peak(&mut self, peak: f64) -> ControllerStatus {
        if !self.active {
            return ControllerStatus::None;
        }
        let status = self.checker.classify(peak);
        let reported = self.evaluate(status);
        self.status.emit(&reported);
        reported
    }

    fn evaluate(&mut self, status: ControllerStatus) -> ControllerStatus {
        let running = self.is_running();
        if !running && !self.config.control_always {
            return status;
        }

        let property = self.config.property;
        let range = match self.range {
            Some(range) => Some(range),
            None => self.refresh_range().ok(),
        };
        let (Some(range), Some(value)) = (range, self.properties.property_value(property)) else {
            if running {
                log::warn!("{property} became unavailable, control stopped");
                self.stop_control();
            }
            return ControllerStatus::NotOk;
        };

        if running {
            if self.correct(status, value, range) {
                self.phase = ControlPhase::Idle;
                self.counter = 0;
                let settled = self.settle(status, value, range);
                log::info!("{property} control finished at {value} with {settled}");
                settled
            } else {
                ControllerStatus::Running
            }
        } else if self.small_correct(status, value, range) {
            self.settle(status, value, range)
        } else {
            ControllerStatus::Running
        }
    }

    /// Final verdict, flagging a saturated property that cannot reach the band.
    fn settle(
        &self,
        status: ControllerStatus,
        value: f64,
        range: PropertyRange,
    ) -> ControllerStatus {
        match status {
            ControllerStatus::Low if value >= range.max - self.step => ControllerStatus::BadLow,
            ControllerStatus::High if value <= range.min + self.step => ControllerStatus::BadHigh,
            other => other,
        }
    }

    fn write(&self, value: f64) {
        let property = self.config.property;
        match self.properties.set_property_value(property, value) {
            Ok(applied) => log::debug!("{property} set to {applied}"),
            // Re-evaluated from the next frame's readback
            Err(e) => log::warn!("{property} write rejected: {e}"),
        }
    }

    /// One step toward the band. Returns true when no step is possible.
    ///
    /// Nothing is written once the value sits within one step of either end
    /// of the range.
    fn small_correct(&self, status: ControllerStatus, value: f64, range: PropertyRange) -> bool {
        if value - range.min <= self.step || range.max - value <= self.step {
            return true;
        }
        let next = match status {
            ControllerStatus::Low => value + self.step,
            ControllerStatus::High => value - self.step,
            _ => return true,
        };
        self.write(range.clamp(next));
        false
    }

    fn count_settled(&mut self) -> bool {
        self.counter += 1;
        if self.counter > self.config.max_counter {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// One run-once iteration. Returns true when the correction is complete.
    fn correct(&mut self, status: ControllerStatus, value: f64, range: PropertyRange) -> bool {
        let (mut low, mut high) = match &mut self.phase {
            ControlPhase::Idle => return true,
            ControlPhase::Bisection { low, high } => (*low, *high),
            ControlPhase::Discovery(analyzer) => match analyzer.check(status, value) {
                RangeStep::Trial(next) => {
                    self.write(next);
                    return false;
                }
                RangeStep::Found { low, high } => {
                    log::info!(
                        "{} range discovery found [{low}, {high}]",
                        self.config.property
                    );
                    (low, high)
                }
            },
        };

        if high - low < self.config.small_range_steps * self.step {
            self.phase = ControlPhase::Bisection { low, high };
            if self.small_correct(status, value, range) {
                return self.count_settled();
            }
            self.counter = 0;
            return false;
        }

        match status {
            ControllerStatus::Ok => {
                self.phase = ControlPhase::Bisection { low, high };
                return self.count_settled();
            }
            ControllerStatus::Low if value > high => {
                self.phase = ControlPhase::Bisection { low, high };
                return self.count_settled();
            }
            ControllerStatus::High if value < low => {
                self.phase = ControlPhase::Bisection { low, high };
                return self.count_settled();
            }
            ControllerStatus::Low => low = value,
            ControllerStatus::High => high = value,
            _ => {}
        }

        self.phase = ControlPhase::Bisection { low, high };
        self.counter = 0;
        self.write((low + high) / 2.0);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::camera_interface::{CameraError, CameraResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Linear peak-vs-property response clipped at 255.
    struct Plant {
        value: Mutex<f64>,
        gain: Mutex<f64>,
        range: PropertyRange,
        open: AtomicBool,
        reject: AtomicBool,
        writes: AtomicUsize,
    }

    impl Plant {
        fn new(value: f64, gain: f64, range: PropertyRange) -> Arc<Self> {
            Arc::new(Self {
                value: Mutex::new(value),
                gain: Mutex::new(gain),
                range,
                open: AtomicBool::new(true),
                reject: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            })
        }

        fn value(&self) -> f64 {
            *self.value.lock().unwrap()
        }

        fn set_gain(&self, gain: f64) {
            *self.gain.lock().unwrap() = gain;
        }

        fn peak(&self) -> f64 {
            (self.value() * *self.gain.lock().unwrap()).clamp(0.0, 255.0)
        }
    }

    impl PropertyAccess for Plant {
        fn available(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn has_property(&self, property: CameraProperty) -> bool {
            self.available() && property == CameraProperty::Exposure
        }

        fn property_value(&self, property: CameraProperty) -> Option<f64> {
            self.has_property(property).then(|| self.value())
        }

        fn set_property_value(&self, property: CameraProperty, value: f64) -> CameraResult<f64> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(CameraError::PropertyRejected {
                    property,
                    value,
                    reason: "busy".into(),
                });
            }
            let applied = self.range.clamp(value);
            *self.value.lock().unwrap() = applied;
            Ok(applied)
        }

        fn property_range(&self, property: CameraProperty) -> Option<PropertyRange> {
            self.has_property(property).then_some(self.range)
        }
    }

    fn range() -> PropertyRange {
        PropertyRange::new(0.0, 200.0, 1.0)
    }

    fn run(
        controller: &mut ExposureController,
        plant: &Plant,
        frames: usize,
    ) -> Vec<ControllerStatus> {
        (0..frames)
            .map(|_| controller.check_peak(plant.peak()))
            .collect()
    }

    #[test]
    fn test_run_once_bisects_to_narrow_band() {
        let plant = Plant::new(10.0, 1.9, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        controller.set_target(200.0, 205.0).unwrap();
        controller.start_control().unwrap();
        assert_eq!(controller.step(), 1.0);

        let statuses = run(&mut controller, &plant, 40);
        let finished = statuses
            .iter()
            .position(|s| *s == ControllerStatus::Ok)
            .unwrap();
        assert!(statuses[..finished]
            .iter()
            .all(|s| *s == ControllerStatus::Running));
        assert!(!controller.is_running());

        let peak = plant.peak();
        assert!((200.0..=205.0).contains(&peak), "peak {peak}");

        // Idle afterwards: no further writes
        let writes = plant.writes.load(Ordering::SeqCst);
        assert!(run(&mut controller, &plant, 5)
            .iter()
            .all(|s| *s == ControllerStatus::Ok));
        assert_eq!(plant.writes.load(Ordering::SeqCst), writes);
    }

    #[test]
    fn test_run_once_needs_consecutive_settled_checks() {
        // Starts in band, so every check only counts
        let plant = Plant::new(110.0, 2.0, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        controller.start_control().unwrap();

        let statuses = run(&mut controller, &plant, 5);
        assert_eq!(
            statuses,
            vec![
                ControllerStatus::Running,
                ControllerStatus::Running,
                ControllerStatus::Running,
                ControllerStatus::Ok,
                ControllerStatus::Ok,
            ]
        );
        assert_eq!(plant.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreachable_band_reports_bad_low() {
        let plant = Plant::new(20.0, 0.5, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        controller.start_control().unwrap();

        let statuses = run(&mut controller, &plant, 80);
        assert!(statuses.contains(&ControllerStatus::BadLow));
        assert!(!controller.is_running());
        assert!(plant.value() >= 199.0);
    }

    #[test]
    fn test_always_mode_tracks_drift() {
        let plant = Plant::new(90.0, 2.0, range());
        let config = ControllerConfig {
            control_always: true,
            ..Default::default()
        };
        let mut controller = ExposureController::new(config, plant.clone());

        let statuses = run(&mut controller, &plant, 6);
        assert_eq!(statuses[..5], [ControllerStatus::Running; 5]);
        assert_eq!(statuses[5], ControllerStatus::Ok);
        assert_eq!(plant.value(), 95.0);

        plant.set_gain(3.0);
        let statuses = run(&mut controller, &plant, 20);
        assert_eq!(statuses.last(), Some(&ControllerStatus::Ok));
        assert_eq!(plant.value(), 80.0);
    }

    #[test]
    fn test_always_mode_saturation_guard() {
        let plant = Plant::new(195.0, 0.5, range());
        let config = ControllerConfig {
            control_always: true,
            ..Default::default()
        };
        let mut controller = ExposureController::new(config, plant.clone());

        let statuses = run(&mut controller, &plant, 10);
        assert_eq!(statuses.last(), Some(&ControllerStatus::BadLow));
        assert_eq!(plant.value(), 199.0);

        let plant = Plant::new(0.5, 1000.0, range());
        let config = ControllerConfig {
            control_always: true,
            ..Default::default()
        };
        let mut controller = ExposureController::new(config, plant.clone());
        assert_eq!(controller.check_peak(plant.peak()), ControllerStatus::BadHigh);
        assert_eq!(plant.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_always_mode_holds_near_either_range_end() {
        let config = ControllerConfig {
            control_always: true,
            ..Default::default()
        };

        // Dark frame, but the value is already within a step of the minimum
        let plant = Plant::new(0.5, 2.0, range());
        let mut controller = ExposureController::new(config.clone(), plant.clone());
        assert_eq!(controller.check_peak(10.0), ControllerStatus::Low);
        assert_eq!(plant.writes.load(Ordering::SeqCst), 0);
        assert_eq!(plant.value(), 0.5);

        // Bright frame within a step of the maximum
        let plant = Plant::new(199.5, 2.0, range());
        let mut controller = ExposureController::new(config, plant.clone());
        assert_eq!(controller.check_peak(250.0), ControllerStatus::High);
        assert_eq!(plant.writes.load(Ordering::SeqCst), 0);
        assert_eq!(plant.value(), 199.5);
    }

    #[test]
    fn test_rejected_write_is_not_retried_in_cycle() {
        let plant = Plant::new(90.0, 2.0, range());
        plant.reject.store(true, Ordering::SeqCst);
        let config = ControllerConfig {
            control_always: true,
            ..Default::default()
        };
        let mut controller = ExposureController::new(config, plant.clone());

        assert_eq!(controller.check_peak(plant.peak()), ControllerStatus::Running);
        assert_eq!(plant.writes.load(Ordering::SeqCst), 1);
        assert_eq!(plant.value(), 90.0);

        plant.reject.store(false, Ordering::SeqCst);
        controller.check_peak(plant.peak());
        assert_eq!(plant.value(), 91.0);
    }

    #[test]
    fn test_stop_keeps_last_value() {
        let plant = Plant::new(10.0, 1.9, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        controller.start_control().unwrap();
        run(&mut controller, &plant, 2);
        let value = plant.value();
        assert_ne!(value, 10.0);

        controller.stop_control();
        assert!(!controller.is_running());
        run(&mut controller, &plant, 3);
        assert_eq!(plant.value(), value);
    }

    #[test]
    fn test_inactive_controller_is_silent() {
        let plant = Plant::new(10.0, 2.0, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        let (_, statuses) = controller.status_events().subscribe_channel();
        controller.start_control().unwrap();

        controller.set_active(false);
        assert!(!controller.is_running());
        assert_eq!(statuses.try_recv().unwrap(), ControllerStatus::None);

        assert_eq!(controller.check_peak(0.0), ControllerStatus::None);
        assert!(statuses.try_recv().is_err());

        controller.set_active(true);
        assert_eq!(controller.check_peak(0.0), ControllerStatus::Low);
        assert_eq!(statuses.try_recv().unwrap(), ControllerStatus::Low);
    }

    #[test]
    fn test_control_always_ignored_while_inactive() {
        let plant = Plant::new(10.0, 2.0, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        controller.set_active(false);

        controller.set_control_always(true).unwrap();
        assert!(!controller.config().control_always);
        assert!(!controller.is_running());
        assert_eq!(controller.check_peak(0.0), ControllerStatus::None);
        assert_eq!(plant.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unavailable_property() {
        let plant = Plant::new(10.0, 2.0, range());
        plant.open.store(false, Ordering::SeqCst);
        let mut controller = ExposureController::new(ControllerConfig::default(), plant.clone());
        assert_eq!(
            controller.start_control(),
            Err(ControlError::PropertyUnavailable(CameraProperty::Exposure))
        );
        assert!(controller.set_control_always(true).is_err());
        assert_eq!(controller.check_peak(0.0), ControllerStatus::NotOk);

        plant.open.store(true, Ordering::SeqCst);
        controller.start_control().unwrap();
        plant.open.store(false, Ordering::SeqCst);
        assert_eq!(controller.check_peak(0.0), ControllerStatus::NotOk);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_invalid_target_rejected() {
        let plant = Plant::new(10.0, 2.0, range());
        let mut controller = ExposureController::new(ControllerConfig::default(), plant);
        assert!(matches!(
            controller.set_target(240.0, 190.0),
            Err(ControlError::InvalidTarget { .. })
        ));
        assert_eq!(controller.config().target_min, 190.0);
    }
}
