//! Ordered stage chain.
//!
//! Stages are appended during setup and the chain is sealed before it moves
//! onto its worker thread. Each frame is converted to intensity, published
//! as the raw frame and handed through the enabled stages in order together
//! with the context produced by the previous stage.

use crate::callback::EventBus;
use crate::config::PipelineConfig;
use crate::finder::{BeamFinder, BeamState};
use crate::profiler::{BeamProfiler, CrossSections};
use crate::stage::{Stage, StageContext, StageParameter};
use ndarray::Array2;
use shared::camera_interface::PropertyAccess;
use shared::{BeamParameters, Frame};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is sealed, stages can no longer be added")]
    Sealed,
    #[error("no stage at index {0}")]
    NoSuchStage(usize),
    #[error("pipeline worker has stopped")]
    WorkerStopped,
    #[error("failed to start pipeline worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Image-level events of a pipeline.
#[derive(Clone, Default)]
pub struct PipelineEvents {
    /// Intensity image of every frame entering the chain
    pub raw_frame: EventBus<Arc<Array2<f64>>>,
    /// Output of the last stage that ran
    pub processed_frame: EventBus<Arc<Array2<f64>>>,
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    sealed: bool,
    events: PipelineEvents,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> Result<(), PipelineError> {
        if self.sealed {
            return Err(PipelineError::Sealed);
        }
        log::debug!("adding stage {} at index {}", stage.name(), self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    /// Freeze the chain. Further [`Self::add_stage`] calls fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn events(&self) -> &PipelineEvents {
        &self.events
    }

    pub fn set_stage_enabled(&mut self, index: usize, enabled: bool) -> Result<(), PipelineError> {
        let stage = self
            .stages
            .get_mut(index)
            .ok_or(PipelineError::NoSuchStage(index))?;
        stage.set_enabled(enabled);
        Ok(())
    }

    /// Route a parameter update to every stage, returning whether any took it.
    pub fn set_parameter(&mut self, parameter: &StageParameter) -> bool {
        self.stages
            .iter_mut()
            .fold(false, |applied, stage| stage.set_parameter(parameter) || applied)
    }

    /// Run `frame` through the chain.
    ///
    /// A disabled stage ends the chain early and the processed event carries
    /// the output of the last stage that ran. A stage returning no result
    /// suppresses the processed event and the call returns `false`.
    pub fn process(&mut self, frame: &Frame) -> bool {
        if self.stages.is_empty() {
            return false;
        }

        let raw = Arc::new(frame.to_intensity());
        self.events.raw_frame.emit(&raw);

        let mut current = raw;
        let mut context = StageContext::default();
        for stage in self.stages.iter_mut() {
            if !stage.is_enabled() {
                log::trace!("stage {} disabled, chain stops", stage.name());
                break;
            }
            match stage.process(&current.view(), &context) {
                Some(output) => {
                    current = Arc::new(output.image);
                    context = output.context;
                }
                None => {
                    log::trace!("stage {} produced no result", stage.name());
                    return false;
                }
            }
        }

        self.events.processed_frame.emit(&current);
        true
    }
}

/// Subscription points of the standard finder/profiler chain.
#[derive(Clone)]
pub struct BeamEvents {
    pub beam_state: EventBus<BeamState>,
    pub parameters: EventBus<BeamParameters>,
    pub cross_sections: EventBus<CrossSections>,
    pub available_parameters: EventBus<Vec<String>>,
}

/// Build the two-stage finder → profiler chain.
///
/// The returned pipeline is not sealed yet so callers may append stages.
pub fn beam_pipeline(
    config: &PipelineConfig,
    properties: Option<Arc<dyn PropertyAccess>>,
) -> (Pipeline, BeamEvents) {
    let mut finder = BeamFinder::new(config.finder.clone());
    finder.set_enabled(config.finder_enabled);
    let mut profiler = BeamProfiler::new(config.profiler.clone());
    if let Some(properties) = properties {
        profiler = profiler.with_properties(properties);
    }
    profiler.set_enabled(config.profiler_enabled);

    let events = BeamEvents {
        beam_state: finder.beam_state_events().clone(),
        parameters: profiler.parameter_events().clone(),
        cross_sections: profiler.cross_section_events().clone(),
        available_parameters: profiler.available_parameter_events().clone(),
    };

    let pipeline = Pipeline {
        stages: vec![Box::new(finder), Box::new(profiler)],
        sealed: false,
        events: PipelineEvents::default(),
    };
    (pipeline, events)
}
