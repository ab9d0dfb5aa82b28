use crate::constants::{CODE_CAPTURE_TIMEOUT, CODE_DEVICE_NOT_CONNECTED};
use crate::types::OperationKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Device lifecycle
    #[error("Initialization failed: {message}")]
    InitializationError { code: Option<i32>, message: String },

    #[error("Device not connected")]
    DeviceDisconnected,

    #[error("Device not initialized")]
    DeviceNotInitialized,

    #[error("No supported device detected")]
    NoDeviceDetected,

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    // Capture
    #[error("Capture timeout")]
    CaptureTimeout,

    #[error("Capture failed ({code}): {message}")]
    CaptureFailure { code: i32, message: String },

    // Store
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("No fingerprints stored")]
    EmptyStore,

    // Orchestration
    #[error("Operation already in progress: {0}")]
    OperationAlreadyInProgress(OperationKind),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Session controller stopped")]
    ControllerStopped,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Best-available numeric diagnostic for status reporting.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::InitializationError { code, .. } => *code,
            Self::DeviceDisconnected => Some(CODE_DEVICE_NOT_CONNECTED),
            Self::CaptureTimeout => Some(CODE_CAPTURE_TIMEOUT),
            Self::CaptureFailure { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error ends the device session and requires re-initialization.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::DeviceDisconnected)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DeviceDisconnected.code(), Some(-2057));
        assert_eq!(Error::CaptureTimeout.code(), Some(-2019));
        assert_eq!(
            Error::CaptureFailure {
                code: -2034,
                message: "bad image".into()
            }
            .code(),
            Some(-2034)
        );
        assert_eq!(Error::EmptyStore.code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::OperationAlreadyInProgress(OperationKind::Capture);
        assert_eq!(err.to_string(), "Operation already in progress: capture");

        let err = Error::CaptureFailure {
            code: -2034,
            message: "bad image".into(),
        };
        assert_eq!(err.to_string(), "Capture failed (-2034): bad image");
    }

    #[test]
    fn test_is_disconnect() {
        assert!(Error::DeviceDisconnected.is_disconnect());
        assert!(!Error::CaptureTimeout.is_disconnect());
    }
}
