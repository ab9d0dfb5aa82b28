//! Capture configuration.
//!
//! Defaults reproduce the behaviour of the field deployment: quality 60,
//! ten-second attempts, ten samples per enrollment, acceptance score 400,
//! unlimited timeout retries and cooperative-only stop in auto mode.

use biokey_core::constants::{
    DEFAULT_MIN_QUALITY, DEFAULT_TARGET_SAMPLES, DEFAULT_TIMEOUT_MS, MATCH_THRESHOLD,
    MAX_QUALITY_SCORE,
};
use biokey_core::{CaptureMode, DeviceModel, Error, Result};
use biokey_hardware::CaptureParams;
use serde::{Deserialize, Serialize};

/// Settings for enrollment and matching.
///
/// Deserializable from a TOML `[capture]` table; missing keys take defaults.
///
/// # Examples
///
/// ```
/// use biokey_session::CaptureConfig;
///
/// let config = CaptureConfig::default()
///     .with_target_samples(3)
///     .with_max_timeout_retries(Some(5));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.min_quality, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Minimum quality (0-100) the sensor must reach.
    pub min_quality: u8,

    /// Per-attempt capture timeout in milliseconds.
    pub timeout_ms: u32,

    /// Samples collected per enrollment.
    pub target_samples: u32,

    /// Score at or above which a stored record matches.
    pub match_threshold: i32,

    /// Consecutive timeouts tolerated on one slot. `None` retries forever.
    pub max_timeout_retries: Option<u32>,

    /// Whether stopping an auto-mode enrollment also aborts the pending capture.
    pub hard_cancel_in_auto: bool,

    /// Capture mode used when none is given explicitly.
    pub mode: CaptureMode,

    /// Model to initialize when the sensor has not announced itself.
    pub device_model: Option<DeviceModel>,

    /// Vendor client key passed to initialization.
    pub client_key: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_quality: DEFAULT_MIN_QUALITY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            target_samples: DEFAULT_TARGET_SAMPLES,
            match_threshold: MATCH_THRESHOLD,
            max_timeout_retries: None,
            hard_cancel_in_auto: false,
            mode: CaptureMode::Manual,
            device_model: None,
            client_key: None,
        }
    }
}

impl CaptureConfig {
    pub fn with_min_quality(mut self, min_quality: u8) -> Self {
        self.min_quality = min_quality;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_target_samples(mut self, target_samples: u32) -> Self {
        self.target_samples = target_samples;
        self
    }

    pub fn with_match_threshold(mut self, threshold: i32) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_max_timeout_retries(mut self, retries: Option<u32>) -> Self {
        self.max_timeout_retries = retries;
        self
    }

    pub fn with_hard_cancel_in_auto(mut self, enabled: bool) -> Self {
        self.hard_cancel_in_auto = enabled;
        self
    }

    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_device_model(mut self, model: DeviceModel) -> Self {
        self.device_model = Some(model);
        self
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    /// Reject settings the session cannot run with.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a zero target, a zero timeout, or a quality
    /// above 100.
    pub fn validate(&self) -> Result<()> {
        if self.target_samples == 0 {
            return Err(Error::Config("target_samples must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be positive".into()));
        }
        if self.min_quality > MAX_QUALITY_SCORE {
            return Err(Error::Config(format!(
                "min_quality must be within 0..={MAX_QUALITY_SCORE}, got {}",
                self.min_quality
            )));
        }
        Ok(())
    }

    /// Parameters for a single capture request.
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams::new(self.min_quality, self.timeout_ms)
    }
}
