//! Processing stage interface shared by the finder and the profiler.

use crate::finder::FinderParameter;
use crate::profiler::ProfilerParameter;
use ndarray::{Array2, ArrayView2};
use shared::image_proc::RoiPlacement;

/// Beam geometry handed from one stage to the next.
///
/// Every field is optional so a stage running standalone (no predecessor)
/// sees an empty context.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageContext {
    /// Beam orientation in radians
    pub angle: Option<f64>,
    /// Beam centre in frame pixels
    pub position: Option<(f64, f64)>,
    /// ROI size in frame pixels
    pub size: Option<(f64, f64)>,
    /// Where the image handed to the next stage sits in the frame
    pub placement: Option<RoiPlacement>,
}

impl StageContext {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of a successful [`Stage::process`] call.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub image: Array2<f64>,
    pub context: StageContext,
}

/// A typed parameter update routed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageParameter {
    Finder(FinderParameter),
    Profiler(ProfilerParameter),
}

/// One link of the processing chain.
pub trait Stage: Send {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Process `image` with the context of the previous stage.
    ///
    /// `None` means "no result for this frame"; stages never panic or error
    /// past this boundary.
    fn process(&mut self, image: &ArrayView2<f64>, context: &StageContext)
        -> Option<StageOutput>;

    /// Apply a parameter update. Updates addressed to another stage are
    /// ignored and return `false`.
    fn set_parameter(&mut self, _parameter: &StageParameter) -> bool {
        false
    }
}
