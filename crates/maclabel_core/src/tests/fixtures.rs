use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use crate::{
    access::FailPolicy,
    capability::mock::MockPrivileges,
    label::Label,
    store::{LabelStore, ObjectHandle, SubjectContext, memory::MemoryBackend},
    transport::{guard::MacGuard, stream::LabelServer},
};

pub(super) type TestStore = LabelStore<MemoryBackend, MockPrivileges>;

/// Label server on an ephemeral loopback port, backed by its own store.
pub(super) struct ServerFixture {
    address: SocketAddr,
    store: Arc<TestStore>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerFixture {
    pub async fn spawn(server_label: Option<Label>) -> Self {
        Self::spawn_with_policy(server_label, FailPolicy::Closed).await
    }

    pub async fn spawn_with_policy(server_label: Option<Label>, policy: FailPolicy) -> Self {
        let store = Arc::new(LabelStore::new(MemoryBackend::new(), MockPrivileges::default()));
        let context = SubjectContext::current();
        if let Some(label) = server_label {
            store.set_subject_label(&context, &label).unwrap();
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server =
            LabelServer::new(MacGuard::from_shared(store.clone()), context).with_fail_policy(policy);
        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stop.await;
                })
                .await
        });

        Self { address, store, shutdown, task }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Binds `label` to every descriptor the next connection could be
    /// accepted on, the way a kernel labels a socket before the server sees it.
    pub fn prebind_connections(&self, label: &Label) {
        for fd in 0..1024 {
            self.store.set_object_label(ObjectHandle::Socket(fd), label).unwrap();
        }
    }

    /// Stops accepting and waits for the connections in progress.
    pub async fn shutdown(self) -> Arc<TestStore> {
        let _ = self.shutdown.send(());
        self.task.await.unwrap();
        self.store
    }
}

macro_rules! assert_refused {
    ($result:expr, $decision:expr) => {
        match $result {
            Err($crate::error::TransportError::Refused(reason)) => assert_eq!(reason, $decision),
            other => panic!("expected a refusal ({}), got {:?}", $decision, other),
        }
    };
}
