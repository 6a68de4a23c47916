//! Labeled TCP streams.
//!
//! ## Handshake
//!
//! ```text
//! client                                   server
//!   | ---- "<label>\n" or "-\n" ------------> |  resolve the connection label
//!   |                                         |  check Read(server subject, connection)
//!   | <--- "client mac label: <label>\n" ---- |  on permit
//!   | ---- "<message>\n" -------------------> |
//!   | <--- "message accepted\n" ------------- |
//!   |                                         |
//!   | <--- "access denied: <decision>\n" ---- |  otherwise, then close
//! ```
//!
//! A label already bound to the connection (by the kernel, under the LSM
//! backend) is authoritative. The announced label is bound only to an unlabeled
//! connection, and an announcement that disagrees with the bound label is
//! refused before any access check.
//!
//! Lines are limited to [`MAX_LINE_LEN`] bytes; a longer line aborts the
//! handshake.
//!
//! The server handles every connection in its own task. Finished tasks are
//! reaped after each accept, without waiting for the ones still running.
//! The connection binding is released before the socket is closed, so a
//! descriptor reused by the next connection never inherits a stale label.

use std::{future::Future, net::SocketAddr, os::fd::AsRawFd};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    task::{JoinError, JoinSet},
};
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::{
    access::{AccessDecision, AccessMode, FailPolicy},
    error::{MacError, QueryError, TransportError},
    label::Label,
    store::{ObjectHandle, SubjectContext},
    transport::guard::{GuardRequest, GuardResponse},
};

pub const DEFAULT_SERVER_PORT: u16 = 9001;
pub const DEFAULT_CLIENT_MESSAGE: &str = "Hello from the client!";

pub const UNLABELED_MARKER: &str = "-";
pub const LABEL_ANSWER_PREFIX: &str = "client mac label: ";
pub const DENIAL_PREFIX: &str = "access denied: ";
pub const ACKNOWLEDGEMENT: &str = "message accepted";

pub const MAX_LINE_LEN: u64 = 1024;

/// How a served connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Accepted { label: Option<Label>, message: String },
    Denied(AccessDecision),
    /// The client announced a label other than the one bound to the connection
    Mismatch { announced: Label, bound: Label },
}

/// What the client learned from a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Label of the connection as seen by the server
    pub reported_label: String,
    pub acknowledgement: String,
}

/// Reads one line of at most [`MAX_LINE_LEN`] bytes, without its terminator.
///
/// A line that reaches the limit without a terminator is an error; it is never
/// split into a truncated line and a remainder.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, TransportError> {
    let mut line = String::new();
    let read = (&mut *reader).take(MAX_LINE_LEN).read_line(&mut line).await?;
    if read == 0 {
        return Err(TransportError::Handshake("connection closed by peer".to_string()));
    }
    if read as u64 == MAX_LINE_LEN && !line.ends_with('\n') {
        return Err(TransportError::Handshake(format!("line exceeds {MAX_LINE_LEN} bytes")));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> Result<(), TransportError> {
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn call<S>(guard: &mut S, request: GuardRequest) -> Result<GuardResponse, MacError>
where
    S: Service<GuardRequest, Response = GuardResponse, Error = MacError>,
{
    guard.ready().await?.call(request).await
}

/// TCP server enforcing read access of its subject on every connection.
#[derive(Debug, Clone)]
pub struct LabelServer<S> {
    guard: S,
    context: SubjectContext,
    policy: FailPolicy,
}

impl<S> LabelServer<S>
where
    S: Service<GuardRequest, Response = GuardResponse, Error = MacError> + Clone + Send + 'static,
    S::Future: Send,
{
    pub fn new(guard: S, context: SubjectContext) -> Self {
        Self { guard, context, policy: FailPolicy::default() }
    }

    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accepts connections until `shutdown` resolves, then waits for the
    /// connections in progress.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "[server] connection accepted");
                        connections.spawn(serve_connection(
                            self.guard.clone(),
                            self.context,
                            self.policy,
                            stream,
                            peer,
                        ));
                    }
                    Err(e) => warn!("[server] accept failed: {e}"),
                },
            }
            while let Some(finished) = connections.try_join_next() {
                log_outcome(finished);
            }
        }

        info!(pending = connections.len(), "[server] shutting down");
        while let Some(finished) = connections.join_next().await {
            log_outcome(finished);
        }
    }
}

fn log_outcome(finished: Result<Result<ConnectionOutcome, MacError>, JoinError>) {
    match finished {
        Ok(Ok(outcome)) => debug!(?outcome, "[server] connection closed"),
        Ok(Err(e)) => warn!("[server] connection failed: {e}"),
        Err(e) => error!("[server] connection task aborted: {e}"),
    }
}

async fn serve_connection<S>(
    mut guard: S,
    context: SubjectContext,
    policy: FailPolicy,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<ConnectionOutcome, MacError>
where
    S: Service<GuardRequest, Response = GuardResponse, Error = MacError>,
{
    let handle = ObjectHandle::Socket(stream.as_raw_fd());
    let result = handshake(&mut guard, context, policy, &mut stream, handle, peer).await;
    if let Err(e) = call(&mut guard, GuardRequest::ReleaseObject(handle)).await {
        warn!(%handle, "[server] binding not released: {e}");
    }
    result
}

async fn handshake<S>(
    guard: &mut S,
    context: SubjectContext,
    policy: FailPolicy,
    stream: &mut TcpStream,
    handle: ObjectHandle,
    peer: SocketAddr,
) -> Result<ConnectionOutcome, MacError>
where
    S: Service<GuardRequest, Response = GuardResponse, Error = MacError>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let header = read_line(&mut reader).await?;
    let announced = if header == UNLABELED_MARKER {
        None
    } else {
        match Label::parse(&header) {
            Ok(label) => Some(label),
            Err(e) => {
                write_line(&mut writer, &format!("{DENIAL_PREFIX}{e}")).await?;
                return Err(e.into());
            }
        }
    };

    match (bound_label(guard, handle).await?, announced) {
        (Some(bound), Some(announced)) if bound != announced => {
            warn!(%peer, %announced, %bound, "[server] announced label does not match");
            write_line(
                &mut writer,
                &format!("{DENIAL_PREFIX}label mismatch (announced {announced}, bound {bound})"),
            )
            .await?;
            return Ok(ConnectionOutcome::Mismatch { announced, bound });
        }
        (None, Some(label)) => {
            call(guard, GuardRequest::SetObjectLabel { handle, label }).await?;
        }
        _ => {}
    }

    let decision = match call(guard, GuardRequest::CheckAccess {
        context,
        handle,
        mode: AccessMode::Read,
    })
    .await?
    {
        GuardResponse::Decision(decision) => decision,
        _ => return Err(MacError::InvalidRequest),
    };
    if !decision.is_granted(policy) {
        info!(%peer, %decision, "[server] connection refused");
        write_line(&mut writer, &format!("{DENIAL_PREFIX}{decision}")).await?;
        return Ok(ConnectionOutcome::Denied(decision));
    }

    // Unlabeled connections only get here under a fail-open policy
    let label = bound_label(guard, handle).await?;
    let shown = label.as_ref().map_or_else(|| UNLABELED_MARKER.to_string(), Label::to_string);
    write_line(&mut writer, &format!("{LABEL_ANSWER_PREFIX}{shown}")).await?;

    let message = read_line(&mut reader).await?;
    info!(%peer, label = %shown, %message, "[server] message received");
    write_line(&mut writer, ACKNOWLEDGEMENT).await?;

    Ok(ConnectionOutcome::Accepted { label, message })
}

/// Label bound to `handle`, `None` when it is unlabeled.
async fn bound_label<S>(guard: &mut S, handle: ObjectHandle) -> Result<Option<Label>, MacError>
where
    S: Service<GuardRequest, Response = GuardResponse, Error = MacError>,
{
    match call(guard, GuardRequest::GetObjectLabel(handle)).await {
        Ok(GuardResponse::Label(label)) => Ok(Some(label)),
        Ok(_) => Err(MacError::InvalidRequest),
        Err(MacError::Query(QueryError::Unlabeled(_))) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Connects to a label server, announces `label` and delivers one message.
///
/// A refusal by the server is reported as [`TransportError::Refused`].
pub async fn exchange(
    address: impl ToSocketAddrs,
    label: Option<&Label>,
    message: &str,
) -> Result<ExchangeReport, TransportError> {
    let mut stream = TcpStream::connect(address).await?;
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let header = label.map_or_else(|| UNLABELED_MARKER.to_string(), Label::to_string);
    write_line(&mut writer, &header).await?;

    let answer = read_line(&mut reader).await?;
    if let Some(reason) = answer.strip_prefix(DENIAL_PREFIX) {
        return Err(TransportError::Refused(reason.to_string()));
    }
    let reported_label = answer
        .strip_prefix(LABEL_ANSWER_PREFIX)
        .ok_or_else(|| TransportError::Handshake(format!("unexpected answer {answer:?}")))?
        .to_string();

    write_line(&mut writer, &message.replace(['\r', '\n'], " ")).await?;
    let acknowledgement = read_line(&mut reader).await?;
    debug!(%reported_label, %acknowledgement, "[client] exchange complete");

    Ok(ExchangeReport { reported_label, acknowledgement })
}
