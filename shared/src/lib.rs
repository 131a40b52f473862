//! Shared components for the beam profiling workspace
//!
//! Frame types, numerical image processing, beam parameter types and the
//! camera interface used by the pipeline, exposure control and the bench.

pub mod beam_parameters;
pub mod camera_interface;
pub mod frame;
pub mod image_proc;
pub mod image_size;
pub mod synthetic;

pub use beam_parameters::BeamParameters;
pub use frame::Frame;
pub use image_size::ImageSize;
