//! Label store: subject and object bindings.
//!
//! The store attaches labels to two kinds of entities:
//!
//! - **Subjects**: processes, addressed through an explicit [`SubjectContext`]
//!   rather than ambient process-wide state, so that tests can simulate several
//!   processes side by side.
//! - **Objects**: sockets and packets, addressed through an [`ObjectHandle`].
//!
//! Every mutation is bracketed by the [`CapabilityGate`], which raises
//! `SET_MAC` for the duration of the backend call and drops it on every path.
//!
//! Nothing is cached here: every query goes to the backend, so a forked worker
//! or a freshly spawned task always observes its own current label.
//!
//! ## Backends
//!
//! - [`memory::MemoryBackend`]: in-memory bindings with optional clearance ceilings
//! - [`lsm::LsmBackend`]: procfs LSM attributes and socket extended attributes

use std::{
    fmt::{self, Display},
    os::fd::RawFd,
};

use tracing::{debug, info, warn};

use crate::{
    capability::{CapabilityGate, CapabilitySet, PrivilegeBackend},
    error::{BackendError, QueryError, SetError},
    label::{Label, LabelType},
};

pub mod lsm;
pub mod memory;

/// Execution context whose label is a subject binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectContext {
    pid: u32,
}

impl SubjectContext {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    /// Context of the calling process.
    pub fn current() -> Self {
        Self { pid: std::process::id() }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Display for SubjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {}", self.pid)
    }
}

/// Handle of an object binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectHandle {
    /// Socket descriptor, valid while the socket is open
    Socket(RawFd),
    /// Packet identifier assigned by the packet layer
    Packet(u64),
}

impl Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectHandle::Socket(fd) => write!(f, "socket (fd: {fd})"),
            ObjectHandle::Packet(id) => write!(f, "packet (id: {id})"),
        }
    }
}

/// Storage facility for label bindings.
///
/// Implementations perform the raw operations only; privilege handling and
/// error classification belong to [`LabelStore`]. `Ok(None)` from a query means
/// that the entity carries no label.
pub trait LabelBackend: Send + Sync {
    fn bind_subject(&self, context: &SubjectContext, label: &Label) -> Result<(), BackendError>;

    fn subject_label(&self, context: &SubjectContext) -> Result<Option<Label>, BackendError>;

    fn bind_object(&self, handle: ObjectHandle, label: &Label) -> Result<(), BackendError>;

    fn object_label(&self, handle: ObjectHandle) -> Result<Option<Label>, BackendError>;

    /// Freezes the binding of an object that is now in flight.
    fn seal_object(&self, handle: ObjectHandle) -> Result<(), BackendError>;

    /// Forgets the binding of a destroyed object.
    fn release_object(&self, handle: ObjectHandle);
}

impl<T: LabelBackend + ?Sized> LabelBackend for Box<T> {
    fn bind_subject(&self, context: &SubjectContext, label: &Label) -> Result<(), BackendError> {
        (**self).bind_subject(context, label)
    }

    fn subject_label(&self, context: &SubjectContext) -> Result<Option<Label>, BackendError> {
        (**self).subject_label(context)
    }

    fn bind_object(&self, handle: ObjectHandle, label: &Label) -> Result<(), BackendError> {
        (**self).bind_object(handle, label)
    }

    fn object_label(&self, handle: ObjectHandle) -> Result<Option<Label>, BackendError> {
        (**self).object_label(handle)
    }

    fn seal_object(&self, handle: ObjectHandle) -> Result<(), BackendError> {
        (**self).seal_object(handle)
    }

    fn release_object(&self, handle: ObjectHandle) {
        (**self).release_object(handle)
    }
}

/// Store over type-erased backends, as built from runtime configuration.
pub type DynLabelStore = LabelStore<Box<dyn LabelBackend>, Box<dyn PrivilegeBackend>>;

/// Gate-bracketed access to a [`LabelBackend`].
#[derive(Debug, Clone, Default)]
pub struct LabelStore<B, P> {
    backend: B,
    gate: CapabilityGate<P>,
}

impl<B: LabelBackend, P: PrivilegeBackend> LabelStore<B, P> {
    pub fn new(backend: B, privileges: P) -> Self {
        Self { backend, gate: CapabilityGate::new(privileges) }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn gate(&self) -> &CapabilityGate<P> {
        &self.gate
    }

    /// Binds `label` to the process of `context`, replacing its current label.
    ///
    /// The stored label is tagged [`LabelType::Subject`].
    pub fn set_subject_label(
        &self,
        context: &SubjectContext,
        label: &Label,
    ) -> Result<(), SetError> {
        let label = label.with_type(LabelType::Subject);
        self.gate
            .with_elevated(CapabilitySet::SET_MAC, || self.backend.bind_subject(context, &label))?
            .map_err(|e| {
                warn!(%context, %label, "[store] subject bind failed: {e}");
                SetError::BindFailed(e.to_string())
            })?;
        info!(%context, %label, "[store] subject label set");
        Ok(())
    }

    pub fn get_subject_label(&self, context: &SubjectContext) -> Result<Label, QueryError> {
        match self.backend.subject_label(context) {
            Ok(Some(label)) => Ok(label),
            Ok(None) => Err(QueryError::Unlabeled(context.to_string())),
            Err(e) => Err(QueryError::Failed(e.to_string())),
        }
    }

    /// Binds `label` to a socket or outbound packet, replacing its current label.
    ///
    /// The stored label is tagged [`LabelType::Object`].
    pub fn set_object_label(&self, handle: ObjectHandle, label: &Label) -> Result<(), SetError> {
        let label = label.with_type(LabelType::Object);
        self.gate
            .with_elevated(CapabilitySet::SET_MAC, || self.backend.bind_object(handle, &label))?
            .map_err(|e| {
                warn!(%handle, %label, "[store] object bind failed: {e}");
                SetError::BindFailed(e.to_string())
            })?;
        debug!(%handle, %label, "[store] object label set");
        Ok(())
    }

    /// Reads the label of a socket or inbound packet.
    ///
    /// An unlabeled handle yields [`QueryError::Unlabeled`], never a default label.
    pub fn get_object_label(&self, handle: ObjectHandle) -> Result<Label, QueryError> {
        match self.backend.object_label(handle) {
            Ok(Some(label)) => Ok(label),
            Ok(None) => Err(QueryError::Unlabeled(handle.to_string())),
            Err(e) => Err(QueryError::Failed(e.to_string())),
        }
    }

    /// Makes the binding of an in-flight packet read-only.
    pub fn seal_object(&self, handle: ObjectHandle) -> Result<(), SetError> {
        self.backend.seal_object(handle).map_err(|e| SetError::BindFailed(e.to_string()))
    }

    pub fn release_object(&self, handle: ObjectHandle) {
        self.backend.release_object(handle);
        debug!(%handle, "[store] object released");
    }
}
