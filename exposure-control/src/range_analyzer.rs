//! Coarse bracketing of a property range before bisection.
//!
//! The range is split into evenly spaced control points. Each check moves
//! the trial value one bracket up when the frame is too dark and one bracket down
//! when it is too bright, remembering the last dark and bright values seen.
//! Discovery ends on the first in-band frame, once both a dark and a bright
//! value are known, or when the trial value runs off either end of the range.

use crate::status::ControllerStatus;
use shared::camera_interface::PropertyRange;

pub const DEFAULT_CONTROL_POINTS: usize = 6;

/// Outcome of one discovery check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeStep {
    /// Set the property to this value and check again
    Trial(f64),
    /// Discovery is over; refine inside `[low, high]`
    Found { low: f64, high: f64 },
}

#[derive(Debug, Clone)]
pub struct RangeAnalyzer {
    points: Vec<f64>,
    bracket: usize,
    left_candidate: Option<f64>,
    right_candidate: Option<f64>,
    found: Option<(f64, f64)>,
}

impl RangeAnalyzer {
    /// Partition `range` into `count` control points and locate `current`.
    ///
    /// Fewer than two points are raised to two so a bracket always exists.
    pub fn new(range: PropertyRange, current: f64, count: usize) -> Self {
        let count = count.max(2);
        let spacing = range.span() / (count - 1) as f64;
        let points: Vec<f64> = (0..count).map(|i| range.min + spacing * i as f64).collect();

        let bracket = if spacing > 0.0 {
            (((current - range.min) / spacing).floor().max(0.0) as usize).min(count - 2)
        } else {
            0
        };

        Self {
            points,
            bracket,
            left_candidate: None,
            right_candidate: None,
            found: None,
        }
    }

    pub fn control_points(&self) -> &[f64] {
        &self.points
    }

    /// Current `(low, high)` control point pair.
    pub fn bracket(&self) -> (f64, f64) {
        (self.points[self.bracket], self.points[self.bracket + 1])
    }

    pub fn left_candidate(&self) -> Option<f64> {
        self.left_candidate
    }

    pub fn right_candidate(&self) -> Option<f64> {
        self.right_candidate
    }

    pub fn is_found(&self) -> bool {
        self.found.is_some()
    }

    fn finish(&mut self, low: f64, high: f64) -> RangeStep {
        let (low, high) = (low.min(high), low.max(high));
        self.found = Some((low, high));
        RangeStep::Found { low, high }
    }

    fn trial(&self) -> RangeStep {
        let (low, high) = self.bracket();
        RangeStep::Trial((low + high) / 2.0)
    }

    /// Feed the verdict for a frame taken at property `value`.
    pub fn check(&mut self, status: ControllerStatus, value: f64) -> RangeStep {
        if let Some((low, high)) = self.found {
            return RangeStep::Found { low, high };
        }

        match status {
            ControllerStatus::Low => {
                self.left_candidate = Some(value);
                if let Some(right) = self.right_candidate {
                    return self.finish(value, right);
                }
                if self.bracket + 2 >= self.points.len() {
                    let (low, high) = self.bracket();
                    return self.finish(low, high);
                }
                self.bracket += 1;
                self.trial()
            }
            ControllerStatus::High => {
                self.right_candidate = Some(value);
                if let Some(left) = self.left_candidate {
                    return self.finish(left, value);
                }
                if self.bracket == 0 {
                    let (low, high) = self.bracket();
                    return self.finish(low, high);
                }
                self.bracket -= 1;
                self.trial()
            }
            _ => {
                let (low, high) = self.bracket();
                self.finish(low, high)
            }
        }
    }
}
