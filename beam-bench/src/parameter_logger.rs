//! Periodic sampling of beam parameters to a tab-separated log.
//!
//! The logger keeps the latest flattened [`BeamParameters`] snapshot fed in
//! through a [`LoggerFeed`]. While active, its own timer thread samples the
//! selected names every interval, appends them to [`LoggingStorage`] and
//! writes one line to the log file. A selected name missing from the
//! snapshot stops logging.

use beam_profiler::EventBus;
use crossbeam_channel::{bounded, select, tick, Sender};
use serde::{Deserialize, Serialize};
use shared::BeamParameters;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("logging is active")]
    Active,

    #[error("no parameters selected")]
    NoParameters,

    #[error("interval {0:?} is below the {MIN_INTERVAL:?} minimum")]
    IntervalTooShort(Duration),

    #[error("parameter {0:?} is missing from the latest snapshot")]
    MissingParameter(String),

    #[error("log file error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Sampling period in milliseconds
    pub interval_ms: u64,
    pub directory: PathBuf,
    /// Log file name, timestamp-derived when unset
    pub filename: Option<String>,
    pub selected: Vec<String>,
    /// Parameter whose series is published on every tick
    pub show_parameter: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            directory: PathBuf::from("."),
            filename: None,
            selected: Vec::new(),
            show_parameter: None,
        }
    }
}

impl LoggerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Default log file name for a session started now.
pub fn default_filename() -> String {
    format!("{}.txt", chrono::Local::now().format("%Y_%m_%d__%H%M"))
}

/// Samples collected during one logging session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoggingStorage {
    /// Elapsed seconds since start, one per tick
    pub time: Vec<f64>,
    pub data: HashMap<String, Vec<f64>>,
    pub counter: usize,
}

impl LoggingStorage {
    pub fn clear(&mut self) {
        self.time.clear();
        self.data.clear();
        self.counter = 0;
    }

    pub fn prepare(&mut self, parameters: &[String]) {
        for name in parameters {
            self.data.insert(name.clone(), Vec::new());
        }
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.data.get(name).map(Vec::as_slice)
    }
}

/// Time series of the shown parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSeries {
    pub name: String,
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

/// Logger events.
#[derive(Clone, Default)]
pub struct LoggerEvents {
    pub state_changed: EventBus<bool>,
    pub available_parameters: EventBus<Vec<String>>,
    pub selected_parameters: EventBus<Vec<String>>,
    pub shown_parameter: EventBus<ParameterSeries>,
}

#[derive(Default)]
struct LoggerState {
    config: LoggerConfig,
    active: bool,
    available: Vec<String>,
    snapshot: HashMap<String, f64>,
    storage: LoggingStorage,
    file: Option<File>,
    started: Option<Instant>,
}

impl LoggerState {
    fn sample(&mut self) -> Result<Option<ParameterSeries>, LoggerError> {
        let elapsed = self
            .started
            .map_or(0.0, |started| started.elapsed().as_secs_f64());

        let values = self
            .config
            .selected
            .iter()
            .map(|name| {
                self.snapshot
                    .get(name)
                    .copied()
                    .ok_or_else(|| LoggerError::MissingParameter(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.storage.time.push(elapsed);
        for (name, &value) in self.config.selected.iter().zip(&values) {
            self.storage.data.entry(name.clone()).or_default().push(value);
        }

        if let Some(file) = self.file.as_mut() {
            let mut line = elapsed.to_string();
            for value in &values {
                line.push('\t');
                line.push_str(&value.to_string());
            }
            writeln!(file, "{line}")?;
        }
        self.storage.counter += 1;

        Ok(self.config.show_parameter.as_ref().and_then(|name| {
            self.storage.series(name).map(|values| ParameterSeries {
                name: name.clone(),
                time: self.storage.time.clone(),
                values: values.to_vec(),
            })
        }))
    }
}

fn lock(state: &Mutex<LoggerState>) -> MutexGuard<'_, LoggerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer-side handle feeding snapshots into a [`ParameterLogger`].
#[derive(Clone)]
pub struct LoggerFeed {
    state: Arc<Mutex<LoggerState>>,
    events: LoggerEvents,
}

impl LoggerFeed {
    /// Replace the snapshot sampled on the next tick.
    pub fn update_parameters(&self, parameters: &BeamParameters) {
        lock(&self.state).snapshot = parameters.flatten().into_iter().collect();
    }

    /// Replace the loggable names. Ignored while logging.
    pub fn update_available_parameters(&self, names: Vec<String>) -> bool {
        let mut state = lock(&self.state);
        if state.active {
            return false;
        }
        state.available = names.clone();
        drop(state);
        self.events.available_parameters.emit(&names);
        true
    }
}

struct Session {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ParameterLogger {
    state: Arc<Mutex<LoggerState>>,
    events: LoggerEvents,
    session: Option<Session>,
}

impl ParameterLogger {
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        if config.interval() < MIN_INTERVAL {
            return Err(LoggerError::IntervalTooShort(config.interval()));
        }
        Ok(Self {
            state: Arc::new(Mutex::new(LoggerState {
                config,
                ..Default::default()
            })),
            events: LoggerEvents::default(),
            session: None,
        })
    }

    pub fn feed(&self) -> LoggerFeed {
        LoggerFeed {
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }

    pub fn events(&self) -> &LoggerEvents {
        &self.events
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub fn config(&self) -> LoggerConfig {
        lock(&self.state).config.clone()
    }

    /// True once at least one parameter can be logged.
    pub fn available(&self) -> bool {
        !lock(&self.state).available.is_empty()
    }

    pub fn available_parameters(&self) -> Vec<String> {
        lock(&self.state).available.clone()
    }

    pub fn storage(&self) -> LoggingStorage {
        lock(&self.state).storage.clone()
    }

    fn configure<F>(&self, apply: F) -> Result<(), LoggerError>
    where
        F: FnOnce(&mut LoggerConfig) -> Result<(), LoggerError>,
    {
        let mut state = lock(&self.state);
        if state.active {
            return Err(LoggerError::Active);
        }
        apply(&mut state.config)
    }

    pub fn set_selected_parameters(&self, names: Vec<String>) -> Result<(), LoggerError> {
        self.configure(|config| {
            config.selected = names.clone();
            Ok(())
        })?;
        self.events.selected_parameters.emit(&names);
        Ok(())
    }

    pub fn set_interval(&self, interval: Duration) -> Result<(), LoggerError> {
        self.configure(|config| {
            if interval < MIN_INTERVAL {
                return Err(LoggerError::IntervalTooShort(interval));
            }
            config.interval_ms = interval.as_millis() as u64;
            Ok(())
        })
    }

    pub fn set_filename(&self, filename: Option<String>) -> Result<(), LoggerError> {
        self.configure(|config| {
            config.filename = filename;
            Ok(())
        })
    }

    /// Choose the published series. Allowed while logging.
    pub fn set_show_parameter(&self, name: Option<String>) {
        lock(&self.state).config.show_parameter = name;
    }

    /// Begin a session, restarting any running one. Returns the log path.
    pub fn start(&mut self) -> Result<PathBuf, LoggerError> {
        self.stop();

        let (path, interval) = {
            let mut state = lock(&self.state);
            if state.config.selected.is_empty() {
                return Err(LoggerError::NoParameters);
            }
            let path = log_path(&state.config);
            let file = create_log(&path, &state.config.selected)?;

            let selected = state.config.selected.clone();
            state.storage.clear();
            state.storage.prepare(&selected);
            state.file = Some(file);
            state.started = Some(Instant::now());
            state.active = true;
            (path, state.config.interval())
        };

        self.events.state_changed.emit(&true);

        let (stop, stop_rx) = bounded::<()>(1);
        let state = self.state.clone();
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("parameter-logger".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let sampled = lock(&state).sample();
                            match sampled {
                                Ok(Some(series)) => events.shown_parameter.emit(&series),
                                Ok(None) => {}
                                Err(e) => {
                                    log::warn!("logging stopped: {e}");
                                    if finish(&state) {
                                        events.state_changed.emit(&false);
                                    }
                                    break;
                                }
                            }
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                if finish(&self.state) {
                    self.events.state_changed.emit(&false);
                }
                return Err(e.into());
            }
        };
        self.session = Some(Session { stop, handle });
        log::info!("logging to {} every {interval:?}", path.display());
        Ok(path)
    }

    /// End the session. Safe to call when not logging.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.stop.send(());
            if session.handle.join().is_err() {
                log::error!("logger thread panicked");
            }
        }
        if finish(&self.state) {
            log::info!("logging stopped");
            self.events.state_changed.emit(&false);
        }
    }
}

impl Drop for ParameterLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mark the session inactive and close the file. True if it was active.
fn finish(state: &Mutex<LoggerState>) -> bool {
    let mut state = lock(state);
    state.file = None;
    std::mem::replace(&mut state.active, false)
}

fn log_path(config: &LoggerConfig) -> PathBuf {
    let filename = config.filename.clone().unwrap_or_else(default_filename);
    config.directory.join(filename)
}

fn create_log(path: &Path, selected: &[String]) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    writeln!(file, "Elapsed Time\t{}", selected.join("\t"))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::beam_parameters::{OtherParameter, ParameterValue, WidthMethod};

    fn parameters(power: f64) -> BeamParameters {
        let mut params = BeamParameters::default();
        params
            .widths
            .insert(WidthMethod::FourSigma, ParameterValue::Pair(10.0, 12.0));
        params.other.insert(OtherParameter::Power, power);
        params
    }

    #[test]
    fn test_interval_minimum() {
        let config = LoggerConfig {
            interval_ms: 5,
            ..Default::default()
        };
        assert!(matches!(
            ParameterLogger::new(config),
            Err(LoggerError::IntervalTooShort(_))
        ));

        let logger = ParameterLogger::new(LoggerConfig::default()).unwrap();
        assert!(logger.set_interval(Duration::from_millis(9)).is_err());
        logger.set_interval(Duration::from_millis(10)).unwrap();
        assert_eq!(logger.config().interval_ms, 10);
    }

    #[test]
    fn test_default_filename_format() {
        let name = default_filename();
        // 2026_10_19__1432.txt
        assert_eq!(name.len(), 20);
        assert!(name.ends_with(".txt"));
        assert_eq!(&name[4..5], "_");
        assert_eq!(&name[10..12], "__");
    }

    #[test]
    fn test_start_requires_selection() {
        let mut logger = ParameterLogger::new(LoggerConfig::default()).unwrap();
        assert!(matches!(logger.start(), Err(LoggerError::NoParameters)));
        assert!(!logger.is_active());
    }

    #[test]
    fn test_sample_writes_selected_values() {
        let mut state = LoggerState {
            config: LoggerConfig {
                selected: vec![
                    "Other Parameters: Power".into(),
                    "Beam Width: 4 Sigma Y".into(),
                ],
                show_parameter: Some("Other Parameters: Power".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        state.snapshot = parameters(5.0).flatten().into_iter().collect();

        let series = state.sample().unwrap().unwrap();
        assert_eq!(series.values, vec![5.0]);
        assert_eq!(state.storage.series("Beam Width: 4 Sigma Y"), Some(&[12.0][..]));
        assert_eq!(state.storage.counter, 1);

        state.snapshot.remove("Beam Width: 4 Sigma Y");
        assert!(matches!(
            state.sample(),
            Err(LoggerError::MissingParameter(name)) if name == "Beam Width: 4 Sigma Y"
        ));
        assert_eq!(state.storage.time.len(), 1);
    }

    #[test]
    fn test_available_parameters_frozen_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = ParameterLogger::new(LoggerConfig {
            directory: dir.path().to_path_buf(),
            selected: vec!["Other Parameters: Power".into()],
            interval_ms: 1000,
            ..Default::default()
        })
        .unwrap();
        let feed = logger.feed();

        assert!(feed.update_available_parameters(vec!["a".into()]));
        assert!(logger.available());

        feed.update_parameters(&parameters(1.0));
        logger.start().unwrap();
        assert!(!feed.update_available_parameters(vec!["b".into()]));
        assert_eq!(logger.available_parameters(), vec!["a".to_string()]);
        assert!(matches!(
            logger.set_selected_parameters(vec![]),
            Err(LoggerError::Active)
        ));
        assert!(matches!(
            logger.set_interval(Duration::from_millis(50)),
            Err(LoggerError::Active)
        ));

        logger.stop();
        logger.stop();
        assert!(feed.update_available_parameters(vec!["b".into()]));
    }
}
