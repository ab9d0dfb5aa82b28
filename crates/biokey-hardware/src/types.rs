//! Types exchanged with the fingerprint sensor.
//!
//! This module defines the device metadata returned by initialization, the
//! parameters of a capture request, and the events the sensor emits while it
//! is plugged in.

use biokey_core::constants::{DEFAULT_MIN_QUALITY, DEFAULT_TIMEOUT_MS, MAX_QUALITY_SCORE};
use biokey_core::ResultCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sensor metadata reported after a successful initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Name the sensor announced itself with (e.g., "MFS500").
    pub name: String,

    /// Manufacturer.
    pub make: String,

    /// Model identifier.
    pub model: String,

    /// Optional serial number.
    pub serial_number: Option<String>,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,

    /// Image width in pixels.
    pub width: u32,

    /// Image height in pixels.
    pub height: u32,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            make: make.into(),
            model: model.into(),
            serial_number: None,
            firmware_version: None,
            width: 0,
            height: 0,
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }

    /// Set the image dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Parameters of a single capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Minimum quality (0-100) a finger must reach to be accepted.
    pub min_quality: u8,

    /// How long the sensor waits for an acceptable finger.
    pub timeout_ms: u32,
}

impl CaptureParams {
    pub fn new(min_quality: u8, timeout_ms: u32) -> Self {
        Self {
            min_quality: min_quality.min(MAX_QUALITY_SCORE),
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_QUALITY, DEFAULT_TIMEOUT_MS)
    }
}

/// Quality metrics of an accepted capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureQuality {
    /// Sensor quality score (0-100, higher is better).
    pub quality: u8,

    /// NFIQ score (1-5, lower is better).
    pub nfiq: u8,
}

impl CaptureQuality {
    pub fn new(quality: u8, nfiq: u8) -> Self {
        Self { quality, nfiq }
    }

    /// Derive an NFIQ bucket from a quality score.
    ///
    /// # Examples
    ///
    /// ```
    /// use biokey_hardware::CaptureQuality;
    ///
    /// assert_eq!(CaptureQuality::from_quality(95).nfiq, 1);
    /// assert_eq!(CaptureQuality::from_quality(65).nfiq, 2);
    /// assert_eq!(CaptureQuality::from_quality(10).nfiq, 5);
    /// ```
    pub fn from_quality(quality: u8) -> Self {
        let nfiq = match quality {
            80.. => 1,
            60..=79 => 2,
            40..=59 => 3,
            20..=39 => 4,
            _ => 5,
        };
        Self::new(quality, nfiq)
    }
}

/// Whether the sensor is plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Events emitted by the sensor.
///
/// Delivered over a broadcast channel; every subscriber sees every event
/// published after it subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceEvent {
    /// The sensor was plugged in or removed.
    Detected {
        name: String,
        state: ConnectionState,
    },

    /// Live preview frame while a capture is waiting for a finger.
    Preview { result: ResultCode, quality: u8 },

    /// Completion of an asynchronous capture started with `begin_capture`.
    CaptureCompleted {
        result: ResultCode,
        quality: u8,
        nfiq: u8,
    },

    /// Finger placement hint. Informational only.
    FingerPosition { result: ResultCode, position: i32 },
}
