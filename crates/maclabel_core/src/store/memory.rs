use std::sync::Arc;

use dashmap::{DashMap, Entry};

use crate::{
    error::BackendError,
    label::Label,
    store::{LabelBackend, ObjectHandle, SubjectContext},
};

#[derive(Debug, Clone)]
struct ObjectBinding {
    label: Option<Label>,
    sealed: bool,
}

/// In-memory label bindings.
///
/// Clones share the same maps. A subject may be given a clearance ceiling:
/// binding a label that the ceiling does not dominate is rejected, which is
/// how a kernel refuses a label above the caller's clearance.
#[derive(Default, Clone, Debug)]
pub struct MemoryBackend {
    subjects: Arc<DashMap<SubjectContext, Label>>,
    ceilings: Arc<DashMap<SubjectContext, Label>>,
    objects: Arc<DashMap<ObjectHandle, ObjectBinding>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ceiling(self, context: SubjectContext, ceiling: Label) -> Self {
        self.set_ceiling(context, ceiling);
        self
    }

    pub fn set_ceiling(&self, context: SubjectContext, ceiling: Label) {
        self.ceilings.insert(context, ceiling);
    }

    /// Number of live object bindings, sealed or not.
    pub fn bound_objects(&self) -> usize {
        self.objects.len()
    }
}

impl LabelBackend for MemoryBackend {
    fn bind_subject(&self, context: &SubjectContext, label: &Label) -> Result<(), BackendError> {
        if let Some(ceiling) = self.ceilings.get(context) {
            if !ceiling.dominates(label) {
                return Err(BackendError::Rejected(format!(
                    "{label} exceeds the clearance {} of {context}",
                    *ceiling
                )));
            }
        }
        self.subjects.insert(*context, label.clone());
        Ok(())
    }

    fn subject_label(&self, context: &SubjectContext) -> Result<Option<Label>, BackendError> {
        Ok(self.subjects.get(context).map(|l| l.clone()))
    }

    fn bind_object(&self, handle: ObjectHandle, label: &Label) -> Result<(), BackendError> {
        match self.objects.entry(handle) {
            Entry::Occupied(entry) if entry.get().sealed => {
                Err(BackendError::Rejected(format!("{handle} is in flight")))
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().label = Some(label.clone());
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(ObjectBinding { label: Some(label.clone()), sealed: false });
                Ok(())
            }
        }
    }

    fn object_label(&self, handle: ObjectHandle) -> Result<Option<Label>, BackendError> {
        Ok(self.objects.get(&handle).and_then(|b| b.label.clone()))
    }

    fn seal_object(&self, handle: ObjectHandle) -> Result<(), BackendError> {
        self.objects
            .entry(handle)
            .and_modify(|binding| binding.sealed = true)
            .or_insert(ObjectBinding { label: None, sealed: true });
        Ok(())
    }

    fn release_object(&self, handle: ObjectHandle) {
        self.objects.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_memory_clones_share_bindings() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.bind_object(ObjectHandle::Socket(4), &Label::object(1, [])).unwrap();
        assert_eq!(
            clone.object_label(ObjectHandle::Socket(4)).unwrap(),
            Some(Label::object(1, []))
        );
    }

    #[test]
    fn unit_memory_ceiling_checks_categories() {
        let context = SubjectContext::new(10);
        let backend = MemoryBackend::new().with_ceiling(context, Label::subject(5, [1]));
        assert!(matches!(
            backend.bind_subject(&context, &Label::subject(1, [2])),
            Err(BackendError::Rejected(_))
        ));
        assert!(backend.bind_subject(&context, &Label::subject(5, [1])).is_ok());
    }

    #[test]
    fn unit_memory_sealed_unlabeled_packet_stays_unlabeled() {
        let backend = MemoryBackend::new();
        let packet = ObjectHandle::Packet(1);
        backend.seal_object(packet).unwrap();
        assert_eq!(backend.object_label(packet).unwrap(), None);
        assert!(backend.bind_object(packet, &Label::object(1, [])).is_err());
    }
}
