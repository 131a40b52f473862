//! Bench runtime around the beam profiling pipeline.
//!
//! [`acquisition`] polls a camera into the pipeline's frame sink,
//! [`parameter_logger`] samples beam parameters to disk and [`config`]
//! bundles the settings of every component.

pub mod acquisition;
pub mod config;
pub mod parameter_logger;

pub use acquisition::{AcquisitionError, CameraGrabber, CameraListener, ListenerStats};
pub use config::BenchConfig;
pub use parameter_logger::{
    LoggerConfig, LoggerError, LoggerEvents, LoggerFeed, LoggingStorage, ParameterLogger,
    ParameterSeries,
};
