//! Command line and environment configuration of the label store.
//!
//! [`MacArgs`] is meant to be flattened into the arguments of each binary:
//!
//! ```ignore
//! #[derive(Parser)]
//! struct Args {
//!     #[command(flatten)]
//!     mac: MacArgs,
//! }
//! ```
//!
//! Every option can also be given through a `MACLABEL_*` environment variable.

use clap::{Args, ValueEnum};
use tracing::info;

use crate::{
    capability::{PrivilegeBackend, mock::MockPrivileges, os::OsPrivileges},
    label::{Label, LabelType},
    store::{
        DynLabelStore, LabelBackend, LabelStore, SubjectContext,
        lsm::{DEFAULT_OBJECT_XATTR, DEFAULT_PROC_ROOT, DEFAULT_PROCESS_ATTRIBUTE, LsmBackend},
        memory::MemoryBackend,
    },
};

/// Where label bindings live.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process bindings, lost at exit
    #[default]
    Memory,
    /// Kernel LSM attributes
    Lsm,
}

/// Where capability state lives.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrivilegeKind {
    /// Simulated capabilities, all permitted
    #[default]
    Mock,
    /// Capabilities of the calling thread
    Os,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MacArgs {
    /// Label storage facility
    #[arg(long, value_enum, env = "MACLABEL_BACKEND", default_value_t = BackendKind::Memory)]
    pub backend: BackendKind,

    /// Capability source of the gate
    #[arg(long, value_enum, env = "MACLABEL_PRIVILEGES", default_value_t = PrivilegeKind::Mock)]
    pub privileges: PrivilegeKind,

    /// procfs attribute holding process labels (lsm backend)
    #[arg(long, env = "MACLABEL_PROC_ATTR", default_value = DEFAULT_PROCESS_ATTRIBUTE)]
    pub proc_attr: String,

    /// procfs mount point (lsm backend)
    #[arg(long, env = "MACLABEL_PROC_ROOT", default_value = DEFAULT_PROC_ROOT)]
    pub proc_root: String,

    /// Extended attribute holding socket labels (lsm backend)
    #[arg(long, env = "MACLABEL_OBJECT_XATTR", default_value = DEFAULT_OBJECT_XATTR)]
    pub object_xattr: String,

    /// Clearance ceiling of this process (memory backend)
    #[arg(long, env = "MACLABEL_CLEARANCE")]
    pub clearance: Option<Label>,
}

impl Default for MacArgs {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            privileges: PrivilegeKind::default(),
            proc_attr: DEFAULT_PROCESS_ATTRIBUTE.to_string(),
            proc_root: DEFAULT_PROC_ROOT.to_string(),
            object_xattr: DEFAULT_OBJECT_XATTR.to_string(),
            clearance: None,
        }
    }
}

impl MacArgs {
    pub fn build_store(&self) -> DynLabelStore {
        let backend: Box<dyn LabelBackend> = match self.backend {
            BackendKind::Memory => {
                let memory = MemoryBackend::new();
                if let Some(clearance) = &self.clearance {
                    memory.set_ceiling(
                        SubjectContext::current(),
                        clearance.with_type(LabelType::Subject),
                    );
                }
                Box::new(memory)
            }
            BackendKind::Lsm => Box::new(
                LsmBackend::new(self.proc_attr.clone(), self.object_xattr.clone())
                    .with_proc_root(&self.proc_root),
            ),
        };
        let privileges: Box<dyn PrivilegeBackend> = match self.privileges {
            PrivilegeKind::Mock => Box::new(MockPrivileges::default()),
            PrivilegeKind::Os => Box::new(OsPrivileges),
        };
        info!(backend = ?self.backend, privileges = ?self.privileges, "[config] label store ready");
        LabelStore::new(backend, privileges)
    }
}
