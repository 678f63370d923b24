use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    errors::Error,
    tactile::{SensorId, RIGHT_HAND_IDS},
    Result,
};

/// Everything one recording session needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub dataset_path: PathBuf,
    /// capture rate of the episode (Hz)
    pub fps: f64,
    /// episode length in seconds
    pub record_duration: f64,

    pub camera: CameraConfig,
    pub tactile: TactileConfig,

    /// frame pairs buffered between capture and encoder
    pub frame_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// combined width of the side-by-side stereo frame
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// device indices `0..probe_count` are tried in order
    pub probe_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TactileConfig {
    pub port: String,
    pub baud: u32,
    /// seconds spent collecting readings before recording
    pub validation_window: f64,
    /// baseline magnitude above which a sensor gets an offset
    pub threshold: i16,
    /// sensors zeroed by calibration, one hand only
    pub calibrated_ids: Vec<SensorId>,
    pub poll_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("dataset/holiworld"),
            fps: 20.0,
            record_duration: 4.0,
            camera: CameraConfig::default(),
            tactile: TactileConfig::default(),
            frame_queue_capacity: 10,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 2560,
            height: 720,
            fps: 30,
            probe_count: 3,
        }
    }
}

impl Default for TactileConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baud: 600,
            validation_window: 2.0,
            threshold: 10,
            calibrated_ids: RIGHT_HAND_IDS.to_vec(),
            poll_interval_ms: 5,
        }
    }
}

impl RecorderConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
    }

    /// Rejects values the capture loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        check_seconds("record_duration", self.record_duration)?;
        check_seconds("tactile.validation_window", self.tactile.validation_window)?;
        if self.frame_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "frame_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn record_duration(&self) -> Duration {
        Duration::from_secs_f64(self.record_duration)
    }
}

fn check_seconds(name: &str, v: f64) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be a non-negative number of seconds, got {v}"
        )))
    }
}

impl TactileConfig {
    pub fn validation_window(&self) -> Duration {
        Duration::from_secs_f64(self.validation_window)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
