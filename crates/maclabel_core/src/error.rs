use std::io;

use thiserror::Error;

use crate::capability::CapabilitySet;

/// Rejection reasons of the label text codec.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MalformedLabel {
    #[error("Malformed label, empty input")]
    Empty,

    #[error("Malformed label, invalid level (token: {0:?})")]
    InvalidLevel(String),

    #[error("Malformed label, invalid category (token: {0:?})")]
    InvalidCategory(String),

    #[error("Malformed label, separator without a following category")]
    DanglingSeparator,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CapabilityError {
    #[error(
        "Capability error, elevation denied (required: {required:?}, permitted: {permitted:?})"
    )]
    ElevationDenied { required: CapabilitySet, permitted: CapabilitySet },

    #[error("Capability error, privilege state unavailable ({0})")]
    QueryFailed(String),

    #[error("Capability error, privilege update rejected ({0})")]
    UpdateFailed(String),
}

/// Failure of a label store mutation.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SetError {
    #[error("Label store error, permission denied: {0}")]
    PermissionDenied(#[from] CapabilityError),

    #[error("Label store error, bind failed ({0})")]
    BindFailed(String),
}

/// Failure of a label store query.
///
/// `Unlabeled` is an expected condition (e.g. traffic from a peer that does not
/// label its packets) and callers usually treat it as "no label", not as a denial.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum QueryError {
    #[error("Label store error, no label bound to {0}")]
    Unlabeled(String),

    #[error("Label store error, label query failed ({0})")]
    Failed(String),
}

/// Errors raised by label backends, mapped to [`SetError`] / [`QueryError`] by the store.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BackendError {
    #[error("Backend error, label rejected by policy ({0})")]
    Rejected(String),

    #[error("Backend error, handle not supported ({0})")]
    Unsupported(String),

    #[error("Backend error, system call failed ({0})")]
    Os(String),

    #[error("Backend error, stored label is unreadable: {0}")]
    Malformed(#[from] MalformedLabel),
}

impl From<io::Error> for BackendError {
    fn from(error: io::Error) -> Self {
        BackendError::Os(error.to_string())
    }
}

impl From<rustix::io::Errno> for BackendError {
    fn from(errno: rustix::io::Errno) -> Self {
        BackendError::Os(io::Error::from(errno).to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PacketError {
    #[error("Packet error, truncated (needed: {needed}, available: {available})")]
    Truncated { needed: usize, available: usize },

    #[error("Packet error, not an IPv4 packet (version: {0})")]
    NotIpv4(u8),

    #[error("Packet error, not a UDP datagram (protocol: {0})")]
    NotUdp(u8),

    #[error("Packet error, header checksum mismatch (computed: {computed:#06x})")]
    HeaderChecksum { computed: u16 },

    #[error("Packet error, UDP checksum mismatch (computed: {computed:#06x})")]
    UdpChecksum { computed: u16 },

    #[error("Packet error, malformed IP option ({0})")]
    MalformedOption(String),

    #[error("Packet error, label cannot be carried in a security option ({0})")]
    LabelNotRepresentable(String),

    #[error("Packet error, payload too large ({0} bytes)")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TransportError {
    #[error("Transport error, I/O failure ({0})")]
    Io(String),

    #[error("Transport error, invalid handshake ({0})")]
    Handshake(String),

    #[error("Transport error, peer refused access ({0})")]
    Refused(String),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

impl From<rustix::io::Errno> for TransportError {
    fn from(errno: rustix::io::Errno) -> Self {
        TransportError::Io(io::Error::from(errno).to_string())
    }
}

/// Aggregated error type of the guard service and the transports.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MacError {
    #[error(transparent)]
    Malformed(#[from] MalformedLabel),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Set(#[from] SetError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("MAC error, invalid request")]
    InvalidRequest,
}
