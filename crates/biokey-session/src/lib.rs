//! Enrollment and matching orchestration for biokey.
//!
//! This crate sequences a fingerprint sensor through initialization, a
//! multi-sample enrollment and 1:N identification against the template store.
//!
//! # Components
//!
//! - [`state_machine`] - enrollment lifecycle: slot counting, retry on
//!   timeout, cooperative stop
//! - [`matcher`] - linear scan with early exit at the acceptance threshold
//! - [`guard`] - fail-fast "operation running" flags
//! - [`controller`] - the public entry surface tying the above to a
//!   [`CaptureDevice`](biokey_hardware::CaptureDevice) and a
//!   [`TemplateStore`](biokey_storage::TemplateStore)
//! - [`status`] - snapshots published after every state change
//! - [`config`] - capture settings

pub mod config;
pub mod controller;
pub mod guard;
pub mod matcher;
pub mod state_machine;
pub mod status;

pub use config::CaptureConfig;
pub use controller::SessionController;
pub use guard::{GuardToken, OperationGuards};
pub use matcher::{MatchOutcome, Matcher};
pub use state_machine::{
    AttemptOutcome, Directive, EnrollmentSession, FailureReason, SessionPhase,
};
pub use status::{SessionStatus, StatusEvent};
