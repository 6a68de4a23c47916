use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    capability::{CapabilitySet, PrivilegeBackend, Privileges},
    error::CapabilityError,
};

#[derive(Debug)]
struct MockState {
    permitted: CapabilitySet,
    effective: CapabilitySet,
    elevations: usize,
}

/// In-memory privilege state.
///
/// Clones share the same state, so a test can keep a handle on the privileges
/// it gave to a gate and observe them after each scope. Raising and lowering
/// happen under one lock, so threads sharing the state only touch their own
/// bits.
#[derive(Debug, Clone)]
pub struct MockPrivileges {
    state: Arc<Mutex<MockState>>,
}

impl MockPrivileges {
    /// Starts with `permitted` raisable capabilities and an empty effective set.
    pub fn new(permitted: CapabilitySet) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                permitted,
                effective: CapabilitySet::empty(),
                elevations: 0,
            })),
        }
    }

    /// Privileges of an unprivileged process.
    pub fn unprivileged() -> Self {
        Self::new(CapabilitySet::empty())
    }

    pub fn effective(&self) -> CapabilitySet {
        self.lock().effective
    }

    /// Number of updates that added capabilities to the effective set.
    pub fn elevations(&self) -> usize {
        self.lock().elevations
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockPrivileges {
    fn default() -> Self {
        Self::new(CapabilitySet::all())
    }
}

impl PrivilegeBackend for MockPrivileges {
    fn privileges(&self) -> Result<Privileges, CapabilityError> {
        let state = self.lock();
        Ok(Privileges { permitted: state.permitted, effective: state.effective })
    }

    fn set_effective(&self, effective: CapabilitySet) -> Result<(), CapabilityError> {
        let mut state = self.lock();
        if !state.permitted.contains(effective) {
            return Err(CapabilityError::UpdateFailed(format!(
                "{:?} exceeds permitted {:?}",
                effective, state.permitted
            )));
        }
        if !effective.difference(state.effective).is_empty() {
            state.elevations += 1;
        }
        state.effective = effective;
        Ok(())
    }

    fn raise(&self, capabilities: CapabilitySet) -> Result<CapabilitySet, CapabilityError> {
        let mut state = self.lock();
        if !state.permitted.contains(capabilities) {
            return Err(CapabilityError::UpdateFailed(format!(
                "{:?} exceeds permitted {:?}",
                capabilities, state.permitted
            )));
        }
        let raised = capabilities.difference(state.effective);
        if !raised.is_empty() {
            state.elevations += 1;
            state.effective |= raised;
        }
        Ok(raised)
    }

    fn lower(&self, capabilities: CapabilitySet) -> Result<(), CapabilityError> {
        self.lock().effective.remove(capabilities);
        Ok(())
    }
}
