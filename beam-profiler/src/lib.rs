//! Real-time beam localisation and metrology.
//!
//! Frames pass a drop-if-busy [`FrameSink`] into a sealed [`Pipeline`] of
//! [`Stage`]s running on a dedicated [`PipelineWorker`] thread. The standard
//! chain is [`BeamFinder`] → [`BeamProfiler`], built by [`beam_pipeline`].
//! Results are published on typed [`EventBus`]es.

pub mod callback;
pub mod config;
pub mod finder;
pub mod pipeline;
pub mod profiler;
pub mod sink;
pub mod stage;
pub mod worker;

pub use callback::{EventBus, SubscriptionId};
pub use config::{BeamFinderConfig, BeamProfilerConfig, Calculation, PipelineConfig};
pub use finder::{BeamFinder, BeamState, FinderParameter, FinderParameterKind};
pub use pipeline::{beam_pipeline, BeamEvents, Pipeline, PipelineError, PipelineEvents};
pub use profiler::{BeamProfiler, CrossSections, ProfilerParameter};
pub use sink::{FrameSink, SinkStats};
pub use stage::{Stage, StageContext, StageOutput, StageParameter};
pub use worker::PipelineWorker;
