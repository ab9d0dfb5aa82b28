//! Enrollment session state machine.
//!
//! The machine owns the lifecycle of one device session: initialization,
//! the per-finger capture sequence, retry on timeout, cooperative stop, and
//! the terminal `Completed`/`Failed` phases. It performs no I/O. The
//! controller feeds it the outcome of every capture attempt and executes the
//! [`Directive`] it returns.
//!
//! # Phases
//!
//! - `Idle`: no device handle
//! - `Initializing`: device initialization in flight
//! - `Ready`: device handle live, no enrollment running
//! - `CapturingFinger(n)`: capture for slot `n` in flight
//! - `AwaitingRetry(n)`: slot `n` timed out and is being captured again
//! - `Stopping`: stop requested, waiting for the in-flight attempt
//! - `Completed`, `Failed(reason)`: terminal for this session
//!
//! # Examples
//!
//! ```
//! use biokey_session::state_machine::{AttemptOutcome, Directive, EnrollmentSession, SessionPhase};
//! use biokey_core::CaptureMode;
//!
//! let mut session = EnrollmentSession::new(2, CaptureMode::Manual);
//! session.begin_initialization().unwrap();
//! session.initialization_succeeded().unwrap();
//!
//! assert_eq!(session.start_enrollment().unwrap(), Directive::Capture { slot: 1 });
//! assert_eq!(
//!     session.apply(AttemptOutcome::TimedOut).unwrap(),
//!     Directive::Retry { slot: 1, attempt: 1 }
//! );
//! assert_eq!(session.apply(AttemptOutcome::Saved).unwrap(), Directive::Capture { slot: 2 });
//! assert_eq!(
//!     session.apply(AttemptOutcome::Saved).unwrap(),
//!     Directive::Finished(SessionPhase::Completed)
//! );
//! assert_eq!(session.captured(), 2);
//! ```

use std::fmt;

use biokey_core::constants::{CODE_CAPTURE_TIMEOUT, CODE_DEVICE_NOT_CONNECTED};
use biokey_core::{CaptureMode, Error, Result};
use serde::{Deserialize, Serialize};

/// Why a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Device initialization failed.
    InitError { code: Option<i32> },

    /// The sensor was unplugged or stopped responding.
    DeviceDisconnected,

    /// A capture ended with a vendor failure code.
    CaptureFailure { code: i32 },

    /// The configured timeout retry limit was reached on one slot.
    RetriesExhausted { slot: u32 },
}

impl FailureReason {
    /// Best-available numeric diagnostic.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::InitError { code } => *code,
            Self::DeviceDisconnected => Some(CODE_DEVICE_NOT_CONNECTED),
            Self::CaptureFailure { code } => Some(*code),
            Self::RetriesExhausted { .. } => Some(CODE_CAPTURE_TIMEOUT),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitError { code: Some(code) } => write!(f, "initialization error ({code})"),
            Self::InitError { code: None } => write!(f, "initialization error"),
            Self::DeviceDisconnected => write!(f, "device disconnected"),
            Self::CaptureFailure { code } => write!(f, "capture failure ({code})"),
            Self::RetriesExhausted { slot } => write!(f, "no finger on slot {slot}"),
        }
    }
}

/// Phase of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Initializing,
    Ready,
    CapturingFinger(u32),
    AwaitingRetry(u32),
    Stopping,
    Completed,
    Failed(FailureReason),
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::CapturingFinger(n) => write!(f, "CapturingFinger({n})"),
            Self::AwaitingRetry(n) => write!(f, "AwaitingRetry({n})"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

impl SessionPhase {
    /// Check if transition to `target` is valid from this phase.
    ///
    /// # Examples
    ///
    /// ```
    /// use biokey_session::state_machine::SessionPhase;
    ///
    /// assert!(SessionPhase::Ready.can_transition_to(&SessionPhase::CapturingFinger(1)));
    /// assert!(!SessionPhase::Ready.can_transition_to(&SessionPhase::CapturingFinger(2)));
    /// assert!(!SessionPhase::Completed.can_transition_to(&SessionPhase::Ready));
    /// ```
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, target) {
            (Idle, Initializing) => true,
            (Initializing, Ready | Failed(_)) => true,
            (Ready, CapturingFinger(1) | Failed(_)) => true,
            (CapturingFinger(n), CapturingFinger(m)) => *m == *n || *m == *n + 1,
            (AwaitingRetry(n), CapturingFinger(m)) => *m == *n || *m == *n + 1,
            (CapturingFinger(n) | AwaitingRetry(n), AwaitingRetry(m)) => m == n,
            (Stopping, CapturingFinger(_) | AwaitingRetry(_)) => true,
            (CapturingFinger(_) | AwaitingRetry(_), Stopping) => true,
            (CapturingFinger(_) | AwaitingRetry(_) | Stopping, Completed | Failed(_)) => true,
            _ => false,
        }
    }

    /// An enrollment is running in this phase.
    pub fn is_enrolling(&self) -> bool {
        matches!(
            self,
            Self::CapturingFinger(_) | Self::AwaitingRetry(_) | Self::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Result of one capture attempt, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Sample persisted.
    Saved,

    /// Capture succeeded but the sample could not be kept (template fetch or
    /// persistence failed). Not counted and not a retry.
    Discarded,

    /// No acceptable finger before the attempt timeout.
    TimedOut,

    /// The sensor was removed.
    Disconnected,

    /// Vendor failure code.
    Failed { code: i32 },
}

/// What the controller must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Issue a capture for `slot`.
    Capture { slot: u32 },

    /// Re-issue the capture for `slot` after a timeout.
    Retry { slot: u32, attempt: u32 },

    /// The enrollment ended in the given terminal phase.
    Finished(SessionPhase),
}

/// A phase change performed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl fmt::Display for PhaseTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// State of one device session and the enrollment running on it.
///
/// Not thread-safe; the controller owns it on a single task.
#[derive(Debug)]
pub struct EnrollmentSession {
    phase: SessionPhase,
    captured: u32,
    target: u32,
    stop_requested: bool,
    mode: CaptureMode,
    consecutive_timeouts: u32,
    max_timeout_retries: Option<u32>,
}

impl EnrollmentSession {
    /// New session in `Idle`. A zero target is raised to one.
    pub fn new(target: u32, mode: CaptureMode) -> Self {
        Self {
            phase: SessionPhase::Idle,
            captured: 0,
            target: target.max(1),
            stop_requested: false,
            mode,
            consecutive_timeouts: 0,
            max_timeout_retries: None,
        }
    }

    /// Builder for sessions that start from a live device handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use biokey_session::state_machine::{EnrollmentSession, SessionPhase};
    ///
    /// let session = EnrollmentSession::builder()
    ///     .with_initial_phase(SessionPhase::Ready)
    ///     .with_target(3)
    ///     .build();
    ///
    /// assert_eq!(session.phase(), SessionPhase::Ready);
    /// assert_eq!(session.target(), 3);
    /// ```
    pub fn builder() -> EnrollmentSessionBuilder {
        EnrollmentSessionBuilder::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Slot the in-flight attempt captures for.
    pub fn current_slot(&self) -> u32 {
        self.captured + 1
    }

    /// `Idle -> Initializing`.
    pub fn begin_initialization(&mut self) -> Result<PhaseTransition> {
        self.transition_to(SessionPhase::Initializing)
    }

    /// `Initializing -> Ready`.
    pub fn initialization_succeeded(&mut self) -> Result<PhaseTransition> {
        self.transition_to(SessionPhase::Ready)
    }

    /// `Initializing -> Failed(InitError)`.
    pub fn initialization_failed(&mut self, code: Option<i32>) -> Result<PhaseTransition> {
        self.transition_to(SessionPhase::Failed(FailureReason::InitError { code }))
    }

    /// `Ready -> CapturingFinger(1)`, resetting the counter and the stop flag.
    pub fn start_enrollment(&mut self) -> Result<Directive> {
        self.transition_to(SessionPhase::CapturingFinger(1))?;
        self.captured = 0;
        self.stop_requested = false;
        self.consecutive_timeouts = 0;
        Ok(Directive::Capture { slot: 1 })
    }

    /// Set the stop flag. Returns `false` when there is nothing to stop or a
    /// stop is already pending.
    pub fn request_stop(&mut self) -> bool {
        if !self.phase.is_enrolling() || self.stop_requested {
            return false;
        }
        self.stop_requested = true;
        self.enter(SessionPhase::Stopping);
        true
    }

    /// Withdraw a pending stop and resume capturing the current slot.
    pub fn withdraw_stop(&mut self) -> Result<PhaseTransition> {
        let resumed = self.resume_phase();
        let transition = self.transition_to(resumed)?;
        self.stop_requested = false;
        Ok(transition)
    }

    /// `Stopping -> Completed` once the in-flight attempt has been aborted.
    pub fn finish_stopped(&mut self) -> Result<PhaseTransition> {
        if self.phase != SessionPhase::Stopping {
            return Err(self.invalid(SessionPhase::Completed));
        }
        self.transition_to(SessionPhase::Completed)
    }

    /// Feed the outcome of the in-flight attempt.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStateTransition`] if no enrollment is running.
    pub fn apply(&mut self, outcome: AttemptOutcome) -> Result<Directive> {
        if !self.phase.is_enrolling() {
            return Err(Error::InvalidStateTransition {
                from: self.phase.to_string(),
                to: format!("{outcome:?}"),
            });
        }

        let slot = self.current_slot();
        match outcome {
            AttemptOutcome::Saved => {
                self.captured += 1;
                self.consecutive_timeouts = 0;
                if self.captured >= self.target || self.stop_requested {
                    return self.finish(SessionPhase::Completed);
                }
                let next = self.current_slot();
                self.transition_to(SessionPhase::CapturingFinger(next))?;
                Ok(Directive::Capture { slot: next })
            }
            AttemptOutcome::Discarded => {
                if self.stop_requested {
                    return self.finish(SessionPhase::Completed);
                }
                self.transition_to(SessionPhase::CapturingFinger(slot))?;
                Ok(Directive::Capture { slot })
            }
            AttemptOutcome::TimedOut => {
                if self.stop_requested {
                    return self.finish(SessionPhase::Completed);
                }
                self.consecutive_timeouts += 1;
                if let Some(max) = self.max_timeout_retries
                    && self.consecutive_timeouts > max
                {
                    return self.finish(SessionPhase::Failed(FailureReason::RetriesExhausted {
                        slot,
                    }));
                }
                self.transition_to(SessionPhase::AwaitingRetry(slot))?;
                Ok(Directive::Retry {
                    slot,
                    attempt: self.consecutive_timeouts,
                })
            }
            AttemptOutcome::Disconnected => {
                self.finish(SessionPhase::Failed(FailureReason::DeviceDisconnected))
            }
            AttemptOutcome::Failed { code } => {
                self.finish(SessionPhase::Failed(FailureReason::CaptureFailure { code }))
            }
        }
    }

    /// Force the session into `Failed` from any non-terminal phase other than
    /// `Idle`. Returns `None` when nothing changed.
    pub fn fail(&mut self, reason: FailureReason) -> Option<PhaseTransition> {
        if matches!(self.phase, SessionPhase::Idle) || self.phase.is_terminal() {
            return None;
        }
        self.stop_requested = false;
        Some(self.enter(SessionPhase::Failed(reason)))
    }

    fn finish(&mut self, phase: SessionPhase) -> Result<Directive> {
        self.transition_to(phase)?;
        Ok(Directive::Finished(phase))
    }

    fn resume_phase(&self) -> SessionPhase {
        if self.consecutive_timeouts > 0 {
            SessionPhase::AwaitingRetry(self.current_slot())
        } else {
            SessionPhase::CapturingFinger(self.current_slot())
        }
    }

    fn invalid(&self, to: SessionPhase) -> Error {
        Error::InvalidStateTransition {
            from: self.phase.to_string(),
            to: to.to_string(),
        }
    }

    fn transition_to(&mut self, new_phase: SessionPhase) -> Result<PhaseTransition> {
        if !self.phase.can_transition_to(&new_phase) {
            return Err(self.invalid(new_phase));
        }
        Ok(self.enter(new_phase))
    }

    fn enter(&mut self, to: SessionPhase) -> PhaseTransition {
        let transition = PhaseTransition {
            from: self.phase,
            to,
        };
        self.phase = to;
        transition
    }
}

/// Builder for [`EnrollmentSession`].
#[derive(Debug)]
pub struct EnrollmentSessionBuilder {
    initial_phase: SessionPhase,
    target: u32,
    mode: CaptureMode,
    max_timeout_retries: Option<u32>,
}

impl Default for EnrollmentSessionBuilder {
    fn default() -> Self {
        Self {
            initial_phase: SessionPhase::Idle,
            target: biokey_core::constants::DEFAULT_TARGET_SAMPLES,
            mode: CaptureMode::Manual,
            max_timeout_retries: None,
        }
    }
}

impl EnrollmentSessionBuilder {
    pub fn with_initial_phase(mut self, phase: SessionPhase) -> Self {
        self.initial_phase = phase;
        self
    }

    pub fn with_target(mut self, target: u32) -> Self {
        self.target = target;
        self
    }

    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_timeout_retries(mut self, retries: Option<u32>) -> Self {
        self.max_timeout_retries = retries;
        self
    }

    pub fn build(self) -> EnrollmentSession {
        let mut session = EnrollmentSession::new(self.target, self.mode);
        session.phase = self.initial_phase;
        session.max_timeout_retries = self.max_timeout_retries;
        session
    }
}
