mod errors;
pub use errors::{Error, Result};

pub mod config;
pub mod tactile;
pub mod wire;

pub mod device_link;
pub mod hand;
pub mod tactile_poller;
pub mod calibration;

pub mod usb_camera;
pub mod data_saver;

pub mod pacer;
pub mod episode;
pub mod session;

pub use calibration::CalibrationGate;
pub use config::RecorderConfig;
pub use data_saver::{DataFile, FrameWriter, VideoDesc};
pub use device_link::{DeviceLink, StatusSource};
pub use episode::{EpisodeRecord, EpisodeStore};
pub use session::{Session, SessionReport};
pub use tactile::{SensorId, TactileSample, TactileSnapshot};
pub use usb_camera::{Frame, FramePair, FrameSource};
