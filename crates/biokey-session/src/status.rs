//! Status snapshots published by the session controller.
//!
//! Every state change produces a new [`SessionStatus`] on a watch channel. The
//! snapshot is self-contained: a subscriber that missed intermediate updates
//! still sees the current phase, the progress counter and the last event.

use std::fmt;

use biokey_core::{CaptureMode, DeviceModel, constants::DEFAULT_TARGET_SAMPLES};
use biokey_hardware::DeviceInfo;
use serde::{Deserialize, Serialize};

use crate::state_machine::SessionPhase;

/// The event that produced a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Idle,
    DeviceDetected { model: Option<DeviceModel>, name: String },
    Initializing,
    Initialized,
    InitFailed { code: Option<i32>, message: String },
    Uninitialized,
    UninitFailed { code: Option<i32>, message: String },
    CaptureStarted { slot: u32 },
    FingerSaved { slot: u32, record_id: String, quality: u8, nfiq: u8 },
    SampleDiscarded { slot: u32, reason: String },
    RetryingAfterTimeout { slot: u32, attempt: u32 },
    StopRequested,
    Stopped,
    StopFailed { code: Option<i32>, message: String },
    Completed,
    Failed { code: Option<i32>, message: String },
    Disconnected,
    Matching,
    MatchFound { record_id: String, score: i32 },
    NoMatch { checked: usize },
    MatchFailed { code: Option<i32>, message: String },
    ShutDown,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::DeviceDetected { name, .. } => write!(f, "device detected: {name}"),
            Self::Initializing => write!(f, "initializing"),
            Self::Initialized => write!(f, "initialized"),
            Self::InitFailed { message, .. } => write!(f, "initialization failed: {message}"),
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::UninitFailed { message, .. } => write!(f, "uninitialization failed: {message}"),
            Self::CaptureStarted { slot } => write!(f, "place finger {slot}"),
            Self::FingerSaved { slot, record_id, quality, .. } => {
                write!(f, "finger {slot} saved as {record_id} (quality {quality})")
            }
            Self::SampleDiscarded { slot, reason } => {
                write!(f, "finger {slot} discarded: {reason}")
            }
            Self::RetryingAfterTimeout { slot, attempt } => {
                write!(f, "no finger on slot {slot}, retry {attempt}")
            }
            Self::StopRequested => write!(f, "stop requested"),
            Self::Stopped => write!(f, "stopped"),
            Self::StopFailed { message, .. } => write!(f, "stop failed: {message}"),
            Self::Completed => write!(f, "completed"),
            Self::Failed { message, .. } => write!(f, "failed: {message}"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Matching => write!(f, "matching"),
            Self::MatchFound { record_id, score } => {
                write!(f, "matched {record_id} (score {score})")
            }
            Self::NoMatch { checked } => write!(f, "no match in {checked} records"),
            Self::MatchFailed { message, .. } => write!(f, "match failed: {message}"),
            Self::ShutDown => write!(f, "shut down"),
        }
    }
}

impl StatusEvent {
    /// Vendor code carried by the event, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::InitFailed { code, .. }
            | Self::UninitFailed { code, .. }
            | Self::StopFailed { code, .. }
            | Self::Failed { code, .. }
            | Self::MatchFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Increases by one with every published snapshot.
    pub seq: u64,
    pub phase: SessionPhase,
    pub captured: u32,
    pub target: u32,
    pub mode: CaptureMode,
    pub device: Option<DeviceInfo>,
    pub detected_model: Option<DeviceModel>,
    pub connected: bool,
    /// Quality of the last preview frame.
    pub live_quality: Option<u8>,
    pub event: StatusEvent,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            seq: 0,
            phase: SessionPhase::Idle,
            captured: 0,
            target: DEFAULT_TARGET_SAMPLES,
            mode: CaptureMode::Manual,
            device: None,
            detected_model: None,
            connected: false,
            live_quality: None,
            event: StatusEvent::Idle,
        }
    }
}

impl SessionStatus {
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_enrolling(&self) -> bool {
        self.phase.is_enrolling()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} {}",
            self.phase, self.captured, self.target, self.event
        )?;
        if let Some(code) = self.event.code() {
            write!(f, " (code {code})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status() {
        let status = SessionStatus::default();
        assert_eq!(status.phase, SessionPhase::Idle);
        assert_eq!(status.target, 10);
        assert!(!status.is_initialized());
        assert_eq!(status.to_string(), "[Idle] 0/10 idle");
    }

    #[test]
    fn test_display_includes_progress_and_code() {
        let status = SessionStatus {
            phase: SessionPhase::CapturingFinger(4),
            captured: 3,
            event: StatusEvent::FingerSaved {
                slot: 3,
                record_id: "USER_003".into(),
                quality: 82,
                nfiq: 1,
            },
            ..SessionStatus::default()
        };
        assert_eq!(
            status.to_string(),
            "[CapturingFinger(4)] 3/10 finger 3 saved as USER_003 (quality 82)"
        );

        let status = SessionStatus {
            event: StatusEvent::Failed {
                code: Some(-2034),
                message: "capture failure (-2034)".into(),
            },
            ..SessionStatus::default()
        };
        assert!(status.to_string().ends_with("(code -2034)"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(StatusEvent::CaptureStarted { slot: 2 }).unwrap();
        assert_eq!(json["event"], "capture_started");
        assert_eq!(json["slot"], 2);
    }
}
