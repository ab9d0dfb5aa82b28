//! Error types for sensor operations.
//!
//! The vendor SDK reports failures as integer codes. [`HardwareError::from_code`]
//! turns them into typed variants so callers can tell a timeout or an unplugged
//! sensor apart from any other failure without comparing magic numbers.

use biokey_core::constants::{CODE_CAPTURE_TIMEOUT, CODE_DEVICE_NOT_CONNECTED, CODE_UNKNOWN};
use biokey_core::ResultCode;

/// Result type alias for sensor operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during sensor operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Sensor is not connected or has been unplugged.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// No finger of sufficient quality within the capture timeout.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation requires an initialized device handle.
    #[error("Device not initialized")]
    NotInitialized,

    /// Vendor failure with its numeric code.
    #[error("Device error ({code}): {message}")]
    Failure { code: i32, message: String },

    /// Device initialization failed.
    #[error("Initialization failed ({code}): {message}")]
    InitializationFailed { code: i32, message: String },

    /// Invalid data received from device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new vendor failure.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(code: i32, message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            code,
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Map a raw non-zero vendor code to an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use biokey_hardware::HardwareError;
    ///
    /// assert!(matches!(HardwareError::from_code(-2019), HardwareError::Timeout { .. }));
    /// assert!(matches!(HardwareError::from_code(-2057), HardwareError::Disconnected { .. }));
    /// assert!(matches!(HardwareError::from_code(-2034), HardwareError::Failure { code: -2034, .. }));
    /// ```
    pub fn from_code(code: i32) -> Self {
        match ResultCode::from_code(code) {
            ResultCode::Timeout => Self::timeout(0),
            ResultCode::DeviceDisconnected => Self::disconnected("sensor"),
            ResultCode::Success | ResultCode::Other(_) => {
                Self::failure(code, describe_code(code))
            }
        }
    }

    /// Numeric diagnostic code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Disconnected { .. } => CODE_DEVICE_NOT_CONNECTED,
            Self::Timeout { .. } => CODE_CAPTURE_TIMEOUT,
            Self::Failure { code, .. } | Self::InitializationFailed { code, .. } => *code,
            Self::NotInitialized | Self::InvalidData { .. } => CODE_UNKNOWN,
        }
    }

    /// Result code as it would appear in a device event.
    pub fn result_code(&self) -> ResultCode {
        ResultCode::from_code(self.code())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// Human-readable text for vendor codes that have no dedicated variant.
fn describe_code(code: i32) -> String {
    match code {
        0 => "Unexpected success code".to_string(),
        c => format!("Sensor reported error code {c}"),
    }
}

impl From<HardwareError> for biokey_core::Error {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Disconnected { .. } => Self::DeviceDisconnected,
            HardwareError::Timeout { .. } => Self::CaptureTimeout,
            HardwareError::NotInitialized => Self::DeviceNotInitialized,
            HardwareError::InitializationFailed { code, message } => Self::InitializationError {
                code: Some(code),
                message,
            },
            HardwareError::Failure { code, message } => Self::CaptureFailure { code, message },
            other => Self::CaptureFailure {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = HardwareError::disconnected("MFS500");
        assert!(error.is_disconnected());
        assert_eq!(error.to_string(), "Device disconnected: MFS500");
        assert_eq!(error.code(), -2057);
    }

    #[test]
    fn test_timeout_error() {
        let error = HardwareError::timeout(10000);
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "Operation timeout after 10000ms");
        assert_eq!(error.result_code(), ResultCode::Timeout);
    }

    #[test]
    fn test_failure_error() {
        let error = HardwareError::failure(-2034, "Image quality too low");
        assert_eq!(error.to_string(), "Device error (-2034): Image quality too low");
        assert_eq!(error.result_code(), ResultCode::Other(-2034));
    }

    #[test]
    fn test_from_code_sentinels() {
        assert!(HardwareError::from_code(-2019).is_timeout());
        assert!(HardwareError::from_code(-2057).is_disconnected());
        assert_eq!(HardwareError::from_code(-7).code(), -7);
    }

    #[test]
    fn test_conversion_into_core_error() {
        let core: biokey_core::Error = HardwareError::timeout(5).into();
        assert!(matches!(core, biokey_core::Error::CaptureTimeout));

        let core: biokey_core::Error = HardwareError::disconnected("x").into();
        assert!(matches!(core, biokey_core::Error::DeviceDisconnected));

        let core: biokey_core::Error = HardwareError::initialization_failed(-2001, "key").into();
        assert!(matches!(
            core,
            biokey_core::Error::InitializationError { code: Some(-2001), .. }
        ));

        let core: biokey_core::Error = HardwareError::invalid_data("no frame").into();
        assert!(matches!(
            core,
            biokey_core::Error::CaptureFailure { code: -1, .. }
        ));
    }

    #[test]
    fn test_codeless_errors_report_unknown() {
        let error = HardwareError::invalid_data("No finger captured");
        assert_eq!(error.to_string(), "Invalid data: No finger captured");
        assert_eq!(error.code(), CODE_UNKNOWN);
        assert_eq!(HardwareError::NotInitialized.code(), CODE_UNKNOWN);
    }
}
