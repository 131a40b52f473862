//! Timer-driven frame acquisition.
//!
//! A [`CameraGrabber`] owns one acquisition thread that polls the camera at
//! the period implied by its frame rate and pushes every frame into a
//! [`FrameSink`]. A [`CameraListener`] keeps the counters and publishes
//! camera errors; a failed query never ends the acquisition loop.

use beam_profiler::{EventBus, FrameSink};
use crossbeam_channel::{select, tick, unbounded, Sender};
use shared::camera_interface::{CameraError, CameraInterface, CameraProperty, SharedCamera};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bound on waiting for the in-flight frame when stopping.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("acquisition is already running")]
    AlreadyRunning,

    #[error("failed to start acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Acquisition counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerStats {
    /// Frames returned by the camera
    pub received: u64,
    /// Frames admitted into the pipeline
    pub accepted: u64,
    /// Frames dropped because the pipeline was busy
    pub dropped: u64,
    pub errors: u64,
    /// Received frames per second since the first frame
    pub fps: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ListenerState {
    stats: ListenerStats,
    first_frame: Option<Instant>,
}

/// Collects acquisition statistics and publishes camera events.
#[derive(Default)]
pub struct CameraListener {
    state: Mutex<ListenerState>,
    errors: EventBus<String>,
    camera_state: EventBus<bool>,
}

impl CameraListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Error messages from failed camera queries.
    pub fn error_events(&self) -> &EventBus<String> {
        &self.errors
    }

    /// `true` when acquisition starts, `false` when it stops.
    pub fn camera_state_events(&self) -> &EventBus<bool> {
        &self.camera_state
    }

    pub fn stats(&self) -> ListenerStats {
        self.lock().stats.clone()
    }

    pub fn reset(&self) {
        *self.lock() = ListenerState::default();
    }

    pub fn on_frame(&self, accepted: bool) {
        let mut state = self.lock();
        let now = Instant::now();
        let first = *state.first_frame.get_or_insert(now);
        let stats = &mut state.stats;
        stats.received += 1;
        if accepted {
            stats.accepted += 1;
        } else {
            stats.dropped += 1;
        }
        let elapsed = now.duration_since(first).as_secs_f64();
        if elapsed > 0.0 {
            stats.fps = (stats.received - 1) as f64 / elapsed;
        }
    }

    pub fn on_error(&self, message: String) {
        {
            let mut state = self.lock();
            state.stats.errors += 1;
            state.stats.last_error = Some(message.clone());
        }
        warn!("camera error: {message}");
        self.errors.emit(&message);
    }

    pub fn on_camera_state_changed(&self, running: bool) {
        self.camera_state.emit(&running);
    }
}

/// Frame period for `fps`, falling back to 30 ms for non-positive rates.
pub fn period_from_fps(fps: f64) -> Duration {
    if fps > 0.0 && fps.is_finite() {
        Duration::from_millis(((1000.0 / fps) as u64).max(1))
    } else {
        Duration::from_millis(30)
    }
}

enum GrabberCommand {
    SetPeriod(Duration),
    Stop,
}

struct Running {
    commands: Sender<GrabberCommand>,
    handle: JoinHandle<()>,
    sink: FrameSink,
}

/// Polls a shared camera on its own thread.
pub struct CameraGrabber {
    camera: SharedCamera,
    listener: Arc<CameraListener>,
    running: Option<Running>,
}

impl CameraGrabber {
    pub fn new(camera: SharedCamera) -> Self {
        Self {
            camera,
            listener: Arc::new(CameraListener::new()),
            running: None,
        }
    }

    pub fn listener(&self) -> &Arc<CameraListener> {
        &self.listener
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the camera and begin feeding `sink`. The camera must be open.
    pub fn start(&mut self, sink: FrameSink) -> Result<(), AcquisitionError> {
        if self.running.is_some() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        {
            let mut camera = self.camera.lock().unwrap_or_else(PoisonError::into_inner);
            if !camera.is_opened() {
                return Err(CameraError::NotOpened.into());
            }
            camera.start()?;
        }

        let period = camera_period(&self.camera);
        let (commands, command_rx) = unbounded();
        let camera = self.camera.clone();
        let listener = self.listener.clone();
        let thread_sink = sink.clone();

        let handle = thread::Builder::new()
            .name("camera-grabber".into())
            .spawn(move || {
                let mut current = period;
                let mut ticker = tick(current);
                loop {
                    let mut retimed = None;
                    select! {
                        recv(ticker) -> _ => {
                            acquire(&camera, &thread_sink, &listener);
                            // Frame rate may change behind the grabber's back
                            retimed = Some(camera_period(&camera));
                        },
                        recv(command_rx) -> command => match command {
                            Ok(GrabberCommand::SetPeriod(period)) => retimed = Some(period),
                            Ok(GrabberCommand::Stop) | Err(_) => break,
                        },
                    }
                    if let Some(period) = retimed.filter(|&p| p != current) {
                        debug!("acquisition period now {period:?}");
                        current = period;
                        ticker = tick(current);
                    }
                }
            })?;

        info!("acquisition started, period {period:?}");
        self.running = Some(Running {
            commands,
            handle,
            sink,
        });
        self.listener.on_camera_state_changed(true);
        Ok(())
    }

    /// Write the camera frame rate and retime the acquisition loop.
    pub fn set_fps(&self, fps: f64) -> Result<f64, AcquisitionError> {
        let applied = self
            .camera
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_property_value(CameraProperty::Fps, fps)?;
        if let Some(running) = &self.running {
            let _ = running
                .commands
                .send(GrabberCommand::SetPeriod(period_from_fps(applied)));
        }
        Ok(applied)
    }

    /// Stop polling, wait for the in-flight frame and stop the camera.
    ///
    /// Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.commands.send(GrabberCommand::Stop);
        if running.handle.join().is_err() {
            warn!("acquisition thread panicked");
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while running.sink.is_processing() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if running.sink.is_processing() {
            warn!("in-flight frame still processing after {DRAIN_TIMEOUT:?}");
        }

        let mut camera = self.camera.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = camera.stop() {
            warn!("failed to stop camera: {e}");
        }
        drop(camera);
        self.listener.on_camera_state_changed(false);
        info!("acquisition stopped");
    }

    /// Stop acquisition and close the camera.
    pub fn close(&mut self) {
        self.stop();
        let mut camera = self.camera.lock().unwrap_or_else(PoisonError::into_inner);
        if camera.is_opened() {
            if let Err(e) = camera.close() {
                warn!("failed to close camera: {e}");
            }
        }
    }
}

impl Drop for CameraGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frame period implied by the camera's current frame rate.
fn camera_period(camera: &SharedCamera) -> Duration {
    let camera = camera.lock().unwrap_or_else(PoisonError::into_inner);
    let fps = if camera.has_property(CameraProperty::Fps) {
        camera.property_value(CameraProperty::Fps).unwrap_or(0.0)
    } else {
        0.0
    };
    period_from_fps(fps)
}

fn acquire(camera: &SharedCamera, sink: &FrameSink, listener: &CameraListener) {
    let result = camera
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .query_frame();
    match result {
        Ok(Some(frame)) => listener.on_frame(sink.submit(frame)),
        Ok(None) => {}
        Err(e) => listener.on_error(e.to_string()),
    }
}
