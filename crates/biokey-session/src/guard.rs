//! Fail-fast operation guards.
//!
//! One flag per [`OperationKind`]. Acquiring a flag that is already set is
//! rejected immediately with [`Error::OperationAlreadyInProgress`]; nothing
//! is queued. The flag is released when the returned [`GuardToken`] drops.
//!
//! [`OperationGuards::clear_all`] forcibly resets every flag (device
//! disconnect). Tokens acquired before the reset become inert: dropping them
//! no longer touches the flags, so a late drop cannot release an operation
//! started after the reset.

use biokey_core::{Error, OperationKind, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const KINDS: [OperationKind; 4] = [
    OperationKind::Init,
    OperationKind::Uninit,
    OperationKind::Capture,
    OperationKind::Stop,
];

#[derive(Debug, Default, Clone, Copy)]
struct Flag {
    running: bool,
    epoch: u64,
}

#[derive(Debug, Default)]
struct GuardState {
    flags: [Flag; 4],
}

impl GuardState {
    fn flag_mut(&mut self, kind: OperationKind) -> &mut Flag {
        &mut self.flags[slot(kind)]
    }

    fn flag(&self, kind: OperationKind) -> Flag {
        self.flags[slot(kind)]
    }
}

fn slot(kind: OperationKind) -> usize {
    match kind {
        OperationKind::Init => 0,
        OperationKind::Uninit => 1,
        OperationKind::Capture => 2,
        OperationKind::Stop => 3,
    }
}

/// Shared set of operation-running flags.
///
/// # Examples
///
/// ```
/// use biokey_core::{Error, OperationKind};
/// use biokey_session::guard::OperationGuards;
///
/// let guards = OperationGuards::new();
///
/// let token = guards.try_acquire(OperationKind::Capture).unwrap();
/// assert!(matches!(
///     guards.try_acquire(OperationKind::Capture),
///     Err(Error::OperationAlreadyInProgress(OperationKind::Capture))
/// ));
///
/// drop(token);
/// assert!(guards.try_acquire(OperationKind::Capture).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct OperationGuards {
    state: Arc<Mutex<GuardState>>,
}

impl OperationGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Test-and-set the flag for `kind`.
    ///
    /// # Errors
    ///
    /// [`Error::OperationAlreadyInProgress`] if the flag is already set.
    pub fn try_acquire(&self, kind: OperationKind) -> Result<GuardToken> {
        let mut state = self.lock();
        let flag = state.flag_mut(kind);
        if flag.running {
            return Err(Error::OperationAlreadyInProgress(kind));
        }
        flag.running = true;

        Ok(GuardToken {
            state: Arc::clone(&self.state),
            kind,
            epoch: flag.epoch,
        })
    }

    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.lock().flag(kind).running
    }

    /// Kinds whose flag is currently set.
    pub fn running(&self) -> Vec<OperationKind> {
        let state = self.lock();
        KINDS
            .into_iter()
            .filter(|kind| state.flag(*kind).running)
            .collect()
    }

    /// Force every flag clear and invalidate the outstanding tokens.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        for flag in &mut state.flags {
            flag.running = false;
            flag.epoch += 1;
        }
    }
}

/// Proof that an operation flag is held. Releases the flag on drop.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken {
    state: Arc<Mutex<GuardState>>,
    kind: OperationKind,
    epoch: u64,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let flag = state.flag_mut(self.kind);
        if flag.epoch == self.epoch {
            flag.running = false;
        }
    }
}
