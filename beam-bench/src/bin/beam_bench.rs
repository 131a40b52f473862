//! Run the beam profiling chain against the virtual camera.
//!
//! Frames are acquired on a timer, profiled on the pipeline thread, checked
//! by the exposure controller and optionally logged to a tab-separated file.

use anyhow::{Context, Result};
use beam_bench::{BenchConfig, CameraGrabber, ParameterLogger};
use beam_profiler::{beam_pipeline, PipelineWorker};
use clap::Parser;
use exposure_control::{ControllerStatus, ExposureController};
use ndarray::Array2;
use shared::camera_interface::mock::{VirtualCamera, VirtualPattern};
use shared::camera_interface::{
    share_camera, CameraInterface, CameraProperty, PropertyAccess, PropertyController,
};
use shared::BeamParameters;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Beam profiling bench driven by a virtual camera"
)]
struct Args {
    /// JSON bench configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration here and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Run time in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    #[arg(long)]
    fps: Option<f64>,

    /// Spot layout: zero, round, perpendicular, left, right
    #[arg(long)]
    pattern: Option<VirtualPattern>,

    /// Physical pixel pitch used for reported widths and positions
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Parameter to log, e.g. "Beam Width: 4 Sigma X" (repeatable)
    #[arg(short = 'p', long = "log-param")]
    log_params: Vec<String>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Run one automatic exposure correction at start-up
    #[arg(long)]
    auto_exposure: bool,

    /// Keep correcting exposure on every frame
    #[arg(long)]
    exposure_always: bool,
}

impl Args {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(pattern) = self.pattern {
            config.camera.pattern = pattern;
        }
        if let Some(pixel_size) = self.pixel_size {
            config.camera.pixel_size = pixel_size;
            config.pipeline.profiler.pixel_size = pixel_size;
        }
        if !self.log_params.is_empty() {
            config.logger.selected = self.log_params.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logger.directory = dir.clone();
        }
        if self.exposure_always {
            config.exposure.control_always = true;
        }
    }
}

fn summarize(parameters: &BeamParameters) -> String {
    parameters
        .flatten()
        .iter()
        .map(|(name, value)| format!("{name}={value:.2}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BenchConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BenchConfig::default(),
    };
    args.apply(&mut config);

    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("failed to save config {}", path.display()))?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    let camera = share_camera(VirtualCamera::new(config.camera.clone()));
    camera
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .open()
        .context("failed to open virtual camera")?;
    let properties: Arc<dyn PropertyAccess> = Arc::new(PropertyController::new(camera.clone()));

    let (pipeline, beam_events) = beam_pipeline(&config.pipeline, Some(properties.clone()));

    let controller = Arc::new(Mutex::new(ExposureController::new(
        config.exposure.clone(),
        properties.clone(),
    )));
    {
        let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
        controller.status_events().subscribe(|status: &ControllerStatus| {
            tracing::debug!("exposure status {status}");
        });
        if args.auto_exposure && !config.exposure.control_always {
            controller.start_control()?;
        }
        if config.exposure.control_always {
            controller.set_control_always(true)?;
        }
    }
    let frame_controller = controller.clone();
    pipeline
        .events()
        .raw_frame
        .subscribe(move |image: &Arc<Array2<f64>>| {
            frame_controller
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check_image(&image.view());
        });

    let mut logger = ParameterLogger::new(config.logger.clone())?;
    let feed = logger.feed();
    beam_events
        .parameters
        .subscribe(move |parameters: &BeamParameters| feed.update_parameters(parameters));
    let feed = logger.feed();
    beam_events
        .available_parameters
        .subscribe(move |names: &Vec<String>| {
            feed.update_available_parameters(names.clone());
        });
    let (_, latest) = beam_events.parameters.subscribe_channel();

    let mut worker = PipelineWorker::spawn(pipeline)?;
    let mut grabber = CameraGrabber::new(camera);
    grabber
        .listener()
        .error_events()
        .subscribe(|message: &String| warn!("acquisition error: {message}"));
    grabber.start(worker.sink().clone())?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration.max(0.0));
    let mut logging_requested = !config.logger.selected.is_empty();
    let mut last_parameters = None;

    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_secs(1)));
        if let Some(parameters) = latest.try_iter().last() {
            last_parameters = Some(parameters);
        }

        // Logging starts once the first snapshot can satisfy the selection
        if logging_requested && last_parameters.is_some() {
            logging_requested = false;
            match logger.start() {
                Ok(path) => info!("logging to {}", path.display()),
                Err(e) => warn!("logging not started: {e}"),
            }
        }

        let stats = grabber.listener().stats();
        info!(
            "frames {} accepted {} dropped {} errors {} fps {:.1}",
            stats.received, stats.accepted, stats.dropped, stats.errors, stats.fps
        );
        if let Some(parameters) = &last_parameters {
            info!("{}", summarize(parameters));
        }
    }

    let exposure = properties.property_value(CameraProperty::Exposure);
    logger.stop();
    grabber.close();
    worker.shutdown();

    let storage = logger.storage();
    if storage.counter > 0 {
        info!("{} samples logged", storage.counter);
    }
    if let Some(exposure) = exposure {
        info!("final exposure {exposure:.1}");
    }
    Ok(())
}
