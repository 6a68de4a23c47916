//! Capability gate.
//!
//! Label mutations and privileged socket creation need privileges that a
//! well-behaved process should hold only for the duration of the call. The
//! [`CapabilityGate`] brackets such calls: it raises the missing capabilities of
//! the requested set in the effective set, runs the body, and lowers what it
//! raised on every exit path, including unwinding.
//!
//! ## Nesting
//!
//! Scopes compose. A nested [`CapabilityGate::with_elevated`] whose capabilities
//! are already effective raises nothing and therefore lowers nothing, leaving the
//! outer scope in charge of the drop.
//!
//! ## Backends
//!
//! - [`os::OsPrivileges`]: Linux thread capabilities through `capget`/`capset`
//! - [`mock::MockPrivileges`]: in-memory state for tests and simulations
//!
//! A backend raises and lowers bits with [`PrivilegeBackend::raise`] and
//! [`PrivilegeBackend::lower`], which leave the other bits of the effective set
//! alone. Scopes on different threads that share one backend therefore never
//! undo each other's elevation as long as they hold different capabilities.
//! Scopes sharing a backend across threads must not overlap on the same
//! capability: the first one to exit lowers it for both. Kernel capabilities
//! are per thread, so [`os::OsPrivileges`] is not affected.

use bitflags::bitflags;
use tracing::{debug, error, warn};

use crate::error::CapabilityError;

pub mod mock;
pub mod os;

bitflags! {
    /// Privileges the gate knows how to manage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilitySet: u32 {
        /// Set process and object labels
        const SET_MAC = 1 << 0;
        /// Create raw sockets and bind privileged ports
        const PRIV_SOCK = 1 << 1;
    }
}

/// Snapshot of the gate-managed privileges of the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privileges {
    /// Capabilities the thread may raise
    pub permitted: CapabilitySet,
    /// Capabilities currently in force
    pub effective: CapabilitySet,
}

/// Source of truth for the privileges of the calling thread.
pub trait PrivilegeBackend: Send + Sync {
    fn privileges(&self) -> Result<Privileges, CapabilityError>;

    /// Replaces the gate-managed part of the effective set.
    fn set_effective(&self, effective: CapabilitySet) -> Result<(), CapabilityError>;

    /// Adds `capabilities` to the effective set and returns the ones that were
    /// not already in it.
    ///
    /// The default reads then writes the state, which is atomic only when the
    /// state belongs to the calling thread.
    fn raise(&self, capabilities: CapabilitySet) -> Result<CapabilitySet, CapabilityError> {
        let state = self.privileges()?;
        let raised = capabilities.difference(state.effective);
        if !raised.is_empty() {
            self.set_effective(state.effective.union(raised))?;
        }
        Ok(raised)
    }

    /// Removes `capabilities` from the effective set.
    fn lower(&self, capabilities: CapabilitySet) -> Result<(), CapabilityError> {
        let state = self.privileges()?;
        self.set_effective(state.effective.difference(capabilities))
    }
}

impl<T: PrivilegeBackend + ?Sized> PrivilegeBackend for Box<T> {
    fn privileges(&self) -> Result<Privileges, CapabilityError> {
        (**self).privileges()
    }

    fn set_effective(&self, effective: CapabilitySet) -> Result<(), CapabilityError> {
        (**self).set_effective(effective)
    }

    fn raise(&self, capabilities: CapabilitySet) -> Result<CapabilitySet, CapabilityError> {
        (**self).raise(capabilities)
    }

    fn lower(&self, capabilities: CapabilitySet) -> Result<(), CapabilityError> {
        (**self).lower(capabilities)
    }
}

impl<T: PrivilegeBackend + ?Sized> PrivilegeBackend for std::sync::Arc<T> {
    fn privileges(&self) -> Result<Privileges, CapabilityError> {
        (**self).privileges()
    }

    fn set_effective(&self, effective: CapabilitySet) -> Result<(), CapabilityError> {
        (**self).set_effective(effective)
    }

    fn raise(&self, capabilities: CapabilitySet) -> Result<CapabilitySet, CapabilityError> {
        (**self).raise(capabilities)
    }

    fn lower(&self, capabilities: CapabilitySet) -> Result<(), CapabilityError> {
        (**self).lower(capabilities)
    }
}

/// Scoped privilege elevation.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate<P> {
    backend: P,
}

impl<P: PrivilegeBackend> CapabilityGate<P> {
    pub fn new(backend: P) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    /// Runs `body` with `required` in the effective set.
    ///
    /// Fails with [`CapabilityError::ElevationDenied`] without invoking `body`
    /// when `required` is not a subset of the permitted set. Whatever the body
    /// returns is handed back untouched; its own failures are not gate failures.
    ///
    /// On exit the raised bits are lowered. Should that fail, the effective set
    /// held at entry is written back as a whole. Only when both updates fail
    /// does the thread keep the raised capabilities; the failure is logged at
    /// error level and the next [`CapabilityGate::relinquish`] clears them.
    pub fn with_elevated<R>(
        &self,
        required: CapabilitySet,
        body: impl FnOnce() -> R,
    ) -> Result<R, CapabilityError> {
        let state = self.backend.privileges()?;
        if !state.permitted.contains(required) {
            warn!(?required, permitted = ?state.permitted, "[capability] elevation denied");
            return Err(CapabilityError::ElevationDenied { required, permitted: state.permitted });
        }

        let raised = self.backend.raise(required)?;
        if !raised.is_empty() {
            debug!(?raised, "[capability] raised");
        }
        let _guard = ElevationGuard { backend: &self.backend, raised, entry: state.effective };

        Ok(body())
    }

    /// Clears every gate-managed capability from the effective set.
    ///
    /// Permitted capabilities are kept, so later scopes can still elevate.
    pub fn relinquish(&self) -> Result<(), CapabilityError> {
        let state = self.backend.privileges()?;
        if !state.effective.is_empty() {
            self.backend.set_effective(CapabilitySet::empty())?;
            debug!(dropped = ?state.effective, "[capability] relinquished");
        }
        Ok(())
    }

    /// Capabilities currently in force.
    pub fn effective(&self) -> Result<CapabilitySet, CapabilityError> {
        Ok(self.backend.privileges()?.effective)
    }
}

/// Lowers the capabilities raised by one scope when dropped.
struct ElevationGuard<'a, P: PrivilegeBackend> {
    backend: &'a P,
    raised: CapabilitySet,
    /// Effective set when the scope was entered
    entry: CapabilitySet,
}

impl<P: PrivilegeBackend> Drop for ElevationGuard<'_, P> {
    fn drop(&mut self) {
        if self.raised.is_empty() {
            return;
        }
        let Err(e) = self.backend.lower(self.raised) else {
            debug!(lowered = ?self.raised, "[capability] lowered");
            return;
        };
        warn!(raised = ?self.raised, "[capability] failed to lower, restoring entry state: {e}");
        match self.backend.set_effective(self.entry) {
            Ok(()) => debug!(restored = ?self.entry, "[capability] entry state restored"),
            Err(e) => error!(raised = ?self.raised, "[capability] failed to restore: {e}"),
        }
    }
}
