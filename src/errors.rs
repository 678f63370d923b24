use std::{io, sync::PoisonError};

use crate::tactile::SensorId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no stereo camera reports the expected frame width")]
    CameraNotFound,
    #[error("frame read failed: {0}")]
    FrameReadError(String),
    #[error("device link is not open")]
    DeviceNotOpen,
    #[error("timed out waiting for response")]
    RxTimeout,
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("tactile validation failed, missing sensor ids {missing_ids:?}")]
    ValidationFailed { missing_ids: Vec<SensorId> },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("device returned error code {code:#06x}")]
    Device { code: u16 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
    #[error("opencv: {0}")]
    OpenCV(String),
    #[error("frame writer is gone")]
    ChannelSend,
    #[error("lock poisoned")]
    Lock,
    #[error("worker thread panicked")]
    WorkerPanicked,
}

#[cfg(feature = "hardware")]
impl From<opencv::Error> for Error {
    fn from(value: opencv::Error) -> Self {
        Error::OpenCV(value.to_string())
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::Lock
    }
}

impl Error {
    /// Session-level errors abort the whole episode.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::CameraNotFound | Error::FrameReadError(_) | Error::ValidationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_do_not_abort_sessions() {
        assert!(Error::ValidationFailed { missing_ids: vec![130] }.is_fatal_to_session());
        assert!(Error::FrameReadError("eof".into()).is_fatal_to_session());
        assert!(!Error::RxTimeout.is_fatal_to_session());
        assert!(!Error::MalformedPacket("short".into()).is_fatal_to_session());
        assert_eq!(
            Error::ValidationFailed { missing_ids: vec![130, 137] }.to_string(),
            "tactile validation failed, missing sensor ids [130, 137]"
        );
    }
}
