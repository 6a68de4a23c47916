//! Linux thread capabilities.
//!
//! Gate-managed capabilities map onto kernel capabilities as follows:
//!
//! | Gate          | Kernel                                  |
//! |---------------|-----------------------------------------|
//! | `SET_MAC`     | `CAP_MAC_ADMIN`                         |
//! | `PRIV_SOCK`   | `CAP_NET_RAW` and `CAP_NET_BIND_SERVICE` |
//!
//! Kernel capabilities outside this mapping are never touched.
//!
//! Capability sets belong to a thread, not to the process. `capset` changes
//! the calling thread only, and a new thread starts with a copy of its
//! creator's sets. A process that drops its effective set must do so before
//! it starts any other thread (an async runtime's workers included), or those
//! threads keep the privileges it meant to give up.

use rustix::thread::{self, CapabilitySet as KernelCapabilities};

use crate::{
    capability::{CapabilitySet, PrivilegeBackend, Privileges},
    error::CapabilityError,
};

fn to_kernel(capabilities: CapabilitySet) -> KernelCapabilities {
    let mut kernel = KernelCapabilities::empty();
    if capabilities.contains(CapabilitySet::SET_MAC) {
        kernel |= KernelCapabilities::MAC_ADMIN;
    }
    if capabilities.contains(CapabilitySet::PRIV_SOCK) {
        kernel |= KernelCapabilities::NET_RAW | KernelCapabilities::NET_BIND_SERVICE;
    }
    kernel
}

fn from_kernel(kernel: KernelCapabilities) -> CapabilitySet {
    let mut capabilities = CapabilitySet::empty();
    if kernel.contains(KernelCapabilities::MAC_ADMIN) {
        capabilities |= CapabilitySet::SET_MAC;
    }
    if kernel.contains(KernelCapabilities::NET_RAW | KernelCapabilities::NET_BIND_SERVICE) {
        capabilities |= CapabilitySet::PRIV_SOCK;
    }
    capabilities
}

/// Capabilities of the calling thread, read and written with `capget`/`capset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsPrivileges;

impl OsPrivileges {
    /// Keeps permitted capabilities across a later switch away from uid 0
    /// (`PR_SET_KEEPCAPS`).
    pub fn keep_across_setuid(&self) -> Result<(), CapabilityError> {
        thread::set_keep_capabilities(true)
            .map_err(|e| CapabilityError::UpdateFailed(format!("PR_SET_KEEPCAPS: {e}")))
    }
}

impl PrivilegeBackend for OsPrivileges {
    fn privileges(&self) -> Result<Privileges, CapabilityError> {
        let sets = thread::capabilities(None)
            .map_err(|e| CapabilityError::QueryFailed(format!("capget: {e}")))?;
        Ok(Privileges {
            permitted: from_kernel(sets.permitted),
            effective: from_kernel(sets.effective),
        })
    }

    fn set_effective(&self, effective: CapabilitySet) -> Result<(), CapabilityError> {
        let mut sets = thread::capabilities(None)
            .map_err(|e| CapabilityError::QueryFailed(format!("capget: {e}")))?;
        let managed = to_kernel(CapabilitySet::all());
        sets.effective = sets.effective.difference(managed).union(to_kernel(effective));
        thread::set_capabilities(None, sets)
            .map_err(|e| CapabilityError::UpdateFailed(format!("capset: {e}")))
    }
}
