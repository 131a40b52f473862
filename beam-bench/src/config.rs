//! Bench configuration persisted as JSON.

use crate::parameter_logger::LoggerConfig;
use beam_profiler::PipelineConfig;
use exposure_control::ControllerConfig;
use serde::{Deserialize, Serialize};
use shared::camera_interface::mock::VirtualCameraConfig;
use std::path::Path;

/// Settings for every component the bench wires together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub camera: VirtualCameraConfig,
    pub pipeline: PipelineConfig,
    pub exposure: ControllerConfig,
    pub logger: LoggerConfig,
}

impl BenchConfig {
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::camera_interface::mock::VirtualPattern;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");

        let mut config = BenchConfig::default();
        config.camera.pattern = VirtualPattern::Left;
        config.pipeline.profiler.pixel_size = 3.45;
        config.exposure.control_always = true;
        config.logger.selected = vec!["Other Parameters: Power".into()];
        config.save_to_file(&path).unwrap();

        assert_eq!(BenchConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"logger": {"interval_ms": 250}}"#).unwrap();

        let config = BenchConfig::load_from_file(&path).unwrap();
        assert_eq!(config.logger.interval_ms, 250);
        assert_eq!(config.exposure, ControllerConfig::default());
        assert_eq!(config.camera, VirtualCameraConfig::default());
    }

    #[test]
    fn test_invalid_json_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, "not json").unwrap();
        let err = BenchConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
