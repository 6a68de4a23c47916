//! Asynchronous facade over the label store and the access evaluator.
//!
//! Network code talks to the MAC core through [`MacGuard`], a [`tower::Service`]
//! taking [`GuardRequest`]s. The underlying operations stay synchronous; the
//! service only adapts them to the request/response style of the transports and
//! makes them composable with tower layers (timeouts, buffering).

use std::{future::Future, pin::Pin, sync::Arc, task::Poll, time::Duration};

use tower::{BoxError, Service, ServiceBuilder, timeout::Timeout, util::MapErr};
use tracing::info;

use crate::{
    access::{self, AccessDecision, AccessMode},
    capability::PrivilegeBackend,
    error::{MacError, TransportError},
    label::Label,
    store::{LabelBackend, LabelStore, ObjectHandle, SubjectContext},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRequest {
    SetSubjectLabel {
        context: SubjectContext,
        label: Label,
    },
    GetSubjectLabel(SubjectContext),
    SetObjectLabel {
        handle: ObjectHandle,
        label: Label,
    },
    GetObjectLabel(ObjectHandle),
    ReleaseObject(ObjectHandle),
    /// Resolves both labels and evaluates `mode` access of the subject on the object
    CheckAccess {
        context: SubjectContext,
        handle: ObjectHandle,
        mode: AccessMode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardResponse {
    Ack,
    Label(Label),
    Decision(AccessDecision),
}

#[derive(Debug)]
pub struct MacGuard<B, P> {
    store: Arc<LabelStore<B, P>>,
}

impl<B, P> Clone for MacGuard<B, P> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone() }
    }
}

impl<B: LabelBackend, P: PrivilegeBackend> MacGuard<B, P> {
    pub fn new(store: LabelStore<B, P>) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<LabelStore<B, P>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LabelStore<B, P> {
        &self.store
    }

    fn handle(&self, request: GuardRequest) -> Result<GuardResponse, MacError> {
        match request {
            GuardRequest::SetSubjectLabel { context, label } => {
                self.store.set_subject_label(&context, &label)?;
                Ok(GuardResponse::Ack)
            }
            GuardRequest::GetSubjectLabel(context) => {
                Ok(GuardResponse::Label(self.store.get_subject_label(&context)?))
            }
            GuardRequest::SetObjectLabel { handle, label } => {
                self.store.set_object_label(handle, &label)?;
                Ok(GuardResponse::Ack)
            }
            GuardRequest::GetObjectLabel(handle) => {
                Ok(GuardResponse::Label(self.store.get_object_label(handle)?))
            }
            GuardRequest::ReleaseObject(handle) => {
                self.store.release_object(handle);
                Ok(GuardResponse::Ack)
            }
            GuardRequest::CheckAccess { context, handle, mode } => {
                let subject = self.store.get_subject_label(&context);
                let object = self.store.get_object_label(handle);
                let decision = access::evaluate(subject.as_ref(), object.as_ref(), mode);
                info!(%context, %handle, %mode, %decision, "[guard] access checked");
                Ok(GuardResponse::Decision(decision))
            }
        }
    }
}

impl<B, P> Service<GuardRequest> for MacGuard<B, P>
where
    B: LabelBackend + 'static,
    P: PrivilegeBackend + 'static,
{
    type Response = GuardResponse;
    type Error = MacError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: GuardRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.handle(request) })
    }
}

/// Guard whose calls fail once `timeout` elapses.
pub type TimedGuard<B, P> = MapErr<Timeout<MacGuard<B, P>>, fn(BoxError) -> MacError>;

pub fn with_timeout<B, P>(guard: MacGuard<B, P>, timeout: Duration) -> TimedGuard<B, P>
where
    B: LabelBackend + 'static,
    P: PrivilegeBackend + 'static,
{
    ServiceBuilder::new()
        .map_err(restore_error as fn(BoxError) -> MacError)
        .timeout(timeout)
        .service(guard)
}

fn restore_error(error: BoxError) -> MacError {
    match error.downcast::<MacError>() {
        Ok(error) => *error,
        Err(other) => TransportError::Io(other.to_string()).into(),
    }
}
