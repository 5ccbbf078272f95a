//! Session-scoped interception gate
//!
//! Issuing the EXPLAIN introspection query over an instrumented connection
//! would report back into the interception hook, recursing without bound.
//! The gate is the session's enable flag: the hook returns immediately while
//! the gate is disabled, and the plan analyzer runs inside
//! [`InterceptGate::while_disabled`], which restores the prior state on every
//! exit path, including unwinding.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ProfileError;

/// Interception enable flag for one measurement session.
///
/// The flag is session state, not process state: two sessions have two
/// independent gates.
#[derive(Debug)]
pub struct InterceptGate {
    enabled: AtomicBool,
}

impl Default for InterceptGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptGate {
    /// Create a gate with interception enabled.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Whether the interception hook should process events right now.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Run `f` with interception disabled, restoring the prior state
    /// afterwards whether `f` returns normally or unwinds.
    ///
    /// After the restore the gate is checked against the recorded prior
    /// state; a mismatch means some other actor mutated the flag during the
    /// guarded region and is reported as [`ProfileError::GateNotRestored`].
    pub fn while_disabled<T>(&self, f: impl FnOnce() -> T) -> Result<T, ProfileError> {
        let prior = self.enabled.swap(false, Ordering::SeqCst);
        let out = {
            let _restore = RestoreOnDrop { gate: self, prior };
            f()
        };
        if self.enabled.load(Ordering::SeqCst) != prior {
            return Err(ProfileError::GateNotRestored);
        }
        Ok(out)
    }
}

/// Restores the gate when dropped, so unwinding out of the guarded region
/// cannot leave measurement disabled.
struct RestoreOnDrop<'a> {
    gate: &'a InterceptGate,
    prior: bool,
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        self.gate.enabled.store(self.prior, Ordering::SeqCst);
    }
}
