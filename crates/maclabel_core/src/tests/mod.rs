#[macro_use]
mod fixtures;

mod stream;

use crate::{
    access::{self, AccessDecision, AccessMode},
    capability::{CapabilitySet, PrivilegeBackend, mock::MockPrivileges},
    label::{Label, LabelType},
    store::{LabelStore, ObjectHandle, SubjectContext, memory::MemoryBackend},
};

#[test]
fn integration_label_to_decision() {
    // flowchart LR
    //     P["process (2:4,7)"] -- read --> S1["socket (1:4)"]
    //     P -- read --x S2["socket (3:4)"]
    //     P -- write --> S2
    crate::maclabel_tracing::init();
    let privileges = MockPrivileges::default();
    let store = LabelStore::new(MemoryBackend::new(), privileges.clone());
    let process = SubjectContext::new(100);
    let lower = ObjectHandle::Socket(10);
    let higher = ObjectHandle::Socket(11);

    store.set_subject_label(&process, &Label::parse_as("2:4,7", LabelType::Subject).unwrap()).unwrap();
    store.set_object_label(lower, &Label::parse("1:4").unwrap()).unwrap();
    store.set_object_label(higher, &Label::parse("3:4").unwrap()).unwrap();

    let subject = store.get_subject_label(&process);
    let decide = |handle, mode| {
        access::evaluate(subject.as_ref(), store.get_object_label(handle).as_ref(), mode)
    };
    assert_eq!(decide(lower, AccessMode::Read), AccessDecision::Permit);
    assert_eq!(decide(higher, AccessMode::Read), AccessDecision::Deny);
    assert_eq!(decide(higher, AccessMode::Write), AccessDecision::Permit);
    assert_eq!(decide(lower, AccessMode::Write), AccessDecision::Deny);
    assert_eq!(decide(ObjectHandle::Socket(12), AccessMode::Read), AccessDecision::Indeterminate);

    // Three relabels, each one elevation, nothing left raised
    assert_eq!(privileges.elevations(), 3);
    assert_eq!(privileges.effective(), CapabilitySet::empty());
}

#[test]
fn integration_relinquish_then_scoped_relabel() {
    crate::maclabel_tracing::init();
    let privileges = MockPrivileges::default();
    privileges.set_effective(CapabilitySet::all()).unwrap();
    let store = LabelStore::new(MemoryBackend::new(), privileges.clone());

    store.gate().relinquish().unwrap();
    assert_eq!(privileges.effective(), CapabilitySet::empty());

    store.set_subject_label(&SubjectContext::new(1), &Label::subject(1, [])).unwrap();
    assert_eq!(privileges.effective(), CapabilitySet::empty());
}
