use crate::{
    Result,
    constants::{CODE_CAPTURE_TIMEOUT, CODE_DEVICE_NOT_CONNECTED, CODE_SUCCESS},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome code of a sensor operation.
///
/// The sensor reports plain integers. Only success and the two sentinels the
/// session layer reacts to get their own variants; everything else is kept
/// verbatim in [`ResultCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// Operation succeeded.
    Success,

    /// No finger of sufficient quality before the timeout.
    Timeout,

    /// The sensor is not connected.
    DeviceDisconnected,

    /// Any other vendor failure code.
    Other(i32),
}

impl ResultCode {
    /// Map a raw vendor code.
    ///
    /// # Examples
    ///
    /// ```
    /// use biokey_core::ResultCode;
    ///
    /// assert_eq!(ResultCode::from_code(0), ResultCode::Success);
    /// assert_eq!(ResultCode::from_code(-2019), ResultCode::Timeout);
    /// assert_eq!(ResultCode::from_code(-2057), ResultCode::DeviceDisconnected);
    /// assert_eq!(ResultCode::from_code(-1), ResultCode::Other(-1));
    /// ```
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_SUCCESS => Self::Success,
            CODE_CAPTURE_TIMEOUT => Self::Timeout,
            CODE_DEVICE_NOT_CONNECTED => Self::DeviceDisconnected,
            other => Self::Other(other),
        }
    }

    /// Raw vendor code for this result.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => CODE_SUCCESS,
            Self::Timeout => CODE_CAPTURE_TIMEOUT,
            Self::DeviceDisconnected => CODE_DEVICE_NOT_CONNECTED,
            Self::Other(code) => *code,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<i32> for ResultCode {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout ({})", CODE_CAPTURE_TIMEOUT),
            Self::DeviceDisconnected => {
                write!(f, "device not connected ({})", CODE_DEVICE_NOT_CONNECTED)
            }
            Self::Other(code) => write!(f, "error ({code})"),
        }
    }
}

/// Supported sensor models.
///
/// The sensor announces itself by name in its detection event; that name is
/// parsed into a model before initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceModel {
    Mfs500,
    Marc10,
    Melo31,
}

impl DeviceModel {
    /// Canonical model name as announced by the sensor.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mfs500 => "MFS500",
            Self::Marc10 => "MARC10",
            Self::Melo31 => "MELO31",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeviceModel {
    type Err = Error;

    /// Parse a detection name. Case and surrounding whitespace are ignored.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MFS500" => Ok(Self::Mfs500),
            "MARC10" => Ok(Self::Marc10),
            "MELO31" => Ok(Self::Melo31),
            _ => Err(Error::UnsupportedDevice(s.to_string())),
        }
    }
}

/// How successive capture attempts are triggered during enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// One asynchronous capture request per completion event.
    #[default]
    Manual,

    /// A dedicated loop calling the synchronous single-shot capture.
    Auto,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Operation categories guarded against overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Init,
    Uninit,
    /// Enrollment and matching share this category.
    Capture,
    Stop,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Uninit => "uninit",
            Self::Capture => "capture",
            Self::Stop => "stop capture",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, ResultCode::Success)]
    #[case(-2019, ResultCode::Timeout)]
    #[case(-2057, ResultCode::DeviceDisconnected)]
    #[case(-2034, ResultCode::Other(-2034))]
    #[case(7, ResultCode::Other(7))]
    fn test_result_code_mapping(#[case] raw: i32, #[case] expected: ResultCode) {
        let code = ResultCode::from_code(raw);
        assert_eq!(code, expected);
        assert_eq!(code.code(), raw);
    }

    #[test]
    fn test_result_code_display() {
        assert_eq!(ResultCode::Success.to_string(), "success");
        assert_eq!(ResultCode::Timeout.to_string(), "timeout (-2019)");
        assert_eq!(ResultCode::Other(-5).to_string(), "error (-5)");
    }

    #[rstest]
    #[case("MFS500", DeviceModel::Mfs500)]
    #[case("marc10", DeviceModel::Marc10)]
    #[case("  MELO31 ", DeviceModel::Melo31)]
    fn test_device_model_parse(#[case] name: &str, #[case] expected: DeviceModel) {
        assert_eq!(name.parse::<DeviceModel>().unwrap(), expected);
    }

    #[test]
    fn test_device_model_parse_unknown() {
        let err = "MSO1300".parse::<DeviceModel>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedDevice(_)));
    }

    #[test]
    fn test_device_model_round_trip_name() {
        for model in [DeviceModel::Mfs500, DeviceModel::Marc10, DeviceModel::Melo31] {
            assert_eq!(model.to_string().parse::<DeviceModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_capture_mode_default_is_manual() {
        assert_eq!(CaptureMode::default(), CaptureMode::Manual);
    }

    #[test]
    fn test_capture_mode_serde() {
        let json = serde_json::to_string(&CaptureMode::Auto).unwrap();
        assert_eq!(json, "\"auto\"");
    }
}
