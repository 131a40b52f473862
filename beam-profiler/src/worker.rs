//! Dedicated pipeline thread fed through a [`FrameSink`].

use crate::pipeline::{Pipeline, PipelineError, PipelineEvents};
use crate::sink::FrameSink;
use crate::stage::StageParameter;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use shared::Frame;
use std::thread::{self, JoinHandle};

/// Messages sent to the pipeline thread.
#[derive(Debug, Clone)]
enum WorkerCommand {
    SetParameter(StageParameter),
    SetStageEnabled { index: usize, enabled: bool },
    Shutdown,
}

/// Owns the pipeline thread.
///
/// Frames enter through [`PipelineWorker::sink`]; configuration changes are
/// queued as commands and applied between frames, so stages never need
/// locking.
pub struct PipelineWorker {
    sink: FrameSink,
    events: PipelineEvents,
    commands: Sender<WorkerCommand>,
    handle: Option<JoinHandle<Pipeline>>,
}

impl PipelineWorker {
    /// Seal `pipeline` and move it onto its own thread.
    pub fn spawn(mut pipeline: Pipeline) -> Result<Self, PipelineError> {
        pipeline.seal();
        let events = pipeline.events().clone();
        let (sink, frames) = FrameSink::new();
        let (commands, command_rx) = unbounded();

        let worker_sink = sink.clone();
        let handle = thread::Builder::new()
            .name("beam-pipeline".into())
            .spawn(move || run(pipeline, frames, command_rx, worker_sink))?;

        Ok(Self {
            sink,
            events,
            commands,
            handle: Some(handle),
        })
    }

    /// Admission gate for the acquisition side.
    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn events(&self) -> &PipelineEvents {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn send(&self, command: WorkerCommand) -> Result<(), PipelineError> {
        if self.handle.is_none() {
            return Err(PipelineError::WorkerStopped);
        }
        self.commands
            .send(command)
            .map_err(|_| PipelineError::WorkerStopped)
    }

    pub fn set_parameter(&self, parameter: StageParameter) -> Result<(), PipelineError> {
        self.send(WorkerCommand::SetParameter(parameter))
    }

    pub fn set_stage_enabled(&self, index: usize, enabled: bool) -> Result<(), PipelineError> {
        self.send(WorkerCommand::SetStageEnabled { index, enabled })
    }

    /// Stop the thread after the in-flight frame and hand the pipeline back.
    ///
    /// Returns `None` when already shut down.
    pub fn shutdown(&mut self) -> Option<Pipeline> {
        let handle = self.handle.take()?;
        let _ = self.commands.send(WorkerCommand::Shutdown);
        match handle.join() {
            Ok(pipeline) => Some(pipeline),
            Err(_) => {
                log::error!("pipeline thread panicked");
                None
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut pipeline: Pipeline,
    frames: Receiver<Frame>,
    commands: Receiver<WorkerCommand>,
    sink: FrameSink,
) -> Pipeline {
    log::debug!("pipeline thread started with {} stages", pipeline.len());
    loop {
        select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => {
                    pipeline.process(&frame);
                    sink.done();
                }
                Err(_) => break,
            },
            recv(commands) -> command => match command {
                Ok(WorkerCommand::SetParameter(parameter)) => {
                    if !pipeline.set_parameter(&parameter) {
                        log::debug!("no stage accepted {parameter:?}");
                    }
                }
                Ok(WorkerCommand::SetStageEnabled { index, enabled }) => {
                    if let Err(e) = pipeline.set_stage_enabled(index, enabled) {
                        log::warn!("{e}");
                    }
                }
                Ok(WorkerCommand::Shutdown) | Err(_) => break,
            },
        }
    }
    log::debug!("pipeline thread stopped");
    pipeline
}
