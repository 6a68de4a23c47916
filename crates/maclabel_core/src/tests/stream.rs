use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    task::JoinSet,
};

use super::fixtures::ServerFixture;
use crate::{
    access::FailPolicy,
    label::Label,
    error::TransportError,
    transport::stream::{ACKNOWLEDGEMENT, DENIAL_PREFIX, MAX_LINE_LEN, exchange},
};

#[tokio::test]
async fn integration_stream_dominated_client_permitted() {
    // flowchart LR
    //     C["client (2:1)"] -- "2:1" --> S["server (3:1,2)"]
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, [1, 2]))).await;

    let report = exchange(server.address(), Some(&Label::object(2, [1])), "hello").await.unwrap();
    assert_eq!(report.reported_label, "2:1");
    assert_eq!(report.acknowledgement, ACKNOWLEDGEMENT);

    let store = server.shutdown().await;
    assert_eq!(store.backend().bound_objects(), 0);
}

#[tokio::test]
async fn integration_stream_equal_label_permitted() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(2, [4, 7]))).await;

    let report = exchange(server.address(), Some(&Label::object(2, [7, 4])), "same").await.unwrap();
    assert_eq!(report.reported_label, "2:4,7");

    server.shutdown().await;
}

#[tokio::test]
async fn integration_stream_undominated_client_denied() {
    // flowchart LR
    //     C1["client (4)"] -- x --> S["server (3:1,2)"]
    //     C2["client (2:1,5)"] -- x --> S
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, [1, 2]))).await;

    assert_refused!(exchange(server.address(), Some(&Label::object(4, [])), "up").await, "deny");
    assert_refused!(
        exchange(server.address(), Some(&Label::object(2, [1, 5])), "aside").await,
        "deny"
    );

    let store = server.shutdown().await;
    assert_eq!(store.backend().bound_objects(), 0);
}

#[tokio::test]
async fn integration_stream_unlabeled_client_denied_when_closed() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, []))).await;

    assert_refused!(exchange(server.address(), None, "anonymous").await, "indeterminate");

    server.shutdown().await;
}

#[tokio::test]
async fn integration_stream_unlabeled_client_accepted_when_open() {
    crate::maclabel_tracing::init();
    let server =
        ServerFixture::spawn_with_policy(Some(Label::subject(3, [])), FailPolicy::Open).await;

    let report = exchange(server.address(), None, "anonymous").await.unwrap();
    assert_eq!(report.reported_label, "-");
    assert_eq!(report.acknowledgement, ACKNOWLEDGEMENT);

    server.shutdown().await;
}

#[tokio::test]
async fn integration_stream_unlabeled_server_denies() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(None).await;

    assert_refused!(
        exchange(server.address(), Some(&Label::object(0, [])), "hello").await,
        "indeterminate"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn integration_stream_malformed_label_refused() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, []))).await;

    let mut stream = TcpStream::connect(server.address()).await.unwrap();
    stream.write_all(b"2:,\n").await.unwrap();
    let mut answer = String::new();
    BufReader::new(&mut stream).read_line(&mut answer).await.unwrap();
    assert!(answer.starts_with(DENIAL_PREFIX), "unexpected answer {answer:?}");
    assert!(answer.contains("Malformed label"));

    let store = server.shutdown().await;
    assert_eq!(store.backend().bound_objects(), 0);
}

#[tokio::test]
async fn integration_stream_concurrent_clients() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(2, [1]))).await;

    let mut clients = JoinSet::new();
    for i in 0..16u32 {
        let address = server.address();
        clients.spawn(async move {
            // Even clients at level 1, odd clients at level 3
            let label = Label::object(1 + 2 * (i % 2), [1]);
            exchange(address, Some(&label), &format!("message {i}")).await.is_ok()
        });
    }

    let mut accepted = 0;
    while let Some(result) = clients.join_next().await {
        if result.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 8);

    let store = server.shutdown().await;
    assert_eq!(store.backend().bound_objects(), 0);
    // Server subject label untouched by the traffic
    assert_eq!(
        store.get_subject_label(&crate::store::SubjectContext::current()).unwrap(),
        Label::subject(2, [1])
    );
}

#[tokio::test]
async fn integration_stream_bound_label_overrides_announcement() {
    // flowchart LR
    //     C["client (bound 9)"] -- "announces 0" --x S["server (1)"]
    crate::maclabel_tracing::init();
    let cases = [
        (Some(Label::object(0, [])), "label mismatch (announced 0, bound 9)"),
        // Announcing the bound label is not enough to be read by a lower server
        (Some(Label::object(9, [])), "deny"),
        (None, "deny"),
    ];
    for (announced, expected) in cases {
        let server = ServerFixture::spawn(Some(Label::subject(1, []))).await;
        server.prebind_connections(&Label::object(9, []));

        assert_refused!(exchange(server.address(), announced.as_ref(), "up").await, expected);

        server.shutdown().await;
    }
}

#[tokio::test]
async fn integration_stream_bound_label_used_for_unlabeled_announcement() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, [1]))).await;
    server.prebind_connections(&Label::object(2, [1]));

    let report = exchange(server.address(), None, "kernel labeled").await.unwrap();
    assert_eq!(report.reported_label, "2:1");
    assert_eq!(report.acknowledgement, ACKNOWLEDGEMENT);

    server.shutdown().await;
}

#[tokio::test]
async fn integration_stream_overlong_message_refused() {
    crate::maclabel_tracing::init();
    let server = ServerFixture::spawn(Some(Label::subject(3, []))).await;

    let message = "m".repeat(MAX_LINE_LEN as usize + 16);
    let result = exchange(server.address(), Some(&Label::object(1, [])), &message).await;
    // The server drops the connection instead of acknowledging a truncated line
    assert!(matches!(result, Err(TransportError::Handshake(_) | TransportError::Io(_))));

    let store = server.shutdown().await;
    assert_eq!(store.backend().bound_objects(), 0);
}
