//! Raw IPv4 sockets carrying [`LabeledDatagram`]s.
//!
//! Creating a raw socket needs `PRIV_SOCK`, which is raised through the
//! capability gate for the `socket` call only. The sender labels its socket
//! and a fresh outbound packet handle with the label of the datagram it sends,
//! and seals the packet binding once the datagram is in flight. The receiver
//! binds the label found in each inbound datagram to a fresh packet handle and
//! seals it.

use std::os::fd::{AsRawFd, OwnedFd};

use rustix::net::{
    AddressFamily, Protocol, RecvFlags, SendFlags, SocketType, ipproto, recvfrom, sendto, socket,
};
use tracing::{debug, info, warn};

use crate::{
    capability::{CapabilitySet, PrivilegeBackend},
    error::{MacError, SetError, TransportError},
    store::{LabelBackend, LabelStore, ObjectHandle},
    transport::packet::LabeledDatagram,
};

pub const DEFAULT_PACKET_PORT: u16 = 8888;
pub const DEFAULT_SOURCE_PORT: u16 = 12345;
pub const DEFAULT_PACKET_LABEL: &str = "1";

const MAX_DATAGRAM_LEN: usize = 65535;

fn open_raw<B: LabelBackend, P: PrivilegeBackend>(
    store: &LabelStore<B, P>,
    protocol: Protocol,
) -> Result<OwnedFd, MacError> {
    let socket = store
        .gate()
        .with_elevated(CapabilitySet::PRIV_SOCK, || {
            socket(AddressFamily::INET, SocketType::RAW, Some(protocol))
        })?
        .map_err(TransportError::from)?;
    Ok(socket)
}

/// Binds the label carried by an inbound datagram to `handle`, then seals it.
///
/// An unlabeled datagram leaves the handle unlabeled, so that later queries
/// report it as such.
pub fn accept_inbound<B: LabelBackend, P: PrivilegeBackend>(
    store: &LabelStore<B, P>,
    handle: ObjectHandle,
    datagram: &LabeledDatagram,
) -> Result<(), SetError> {
    if let Some(label) = &datagram.label {
        store.set_object_label(handle, label)?;
    }
    store.seal_object(handle)
}

/// Binds the label of `datagram` to the outbound packet `handle`, hands the
/// encoded packet to `transmit` and seals the binding once it is in flight.
///
/// A packet that fails to encode or to transmit leaves no binding behind.
pub fn dispatch_outbound<B: LabelBackend, P: PrivilegeBackend>(
    store: &LabelStore<B, P>,
    handle: ObjectHandle,
    datagram: &LabeledDatagram,
    transmit: impl FnOnce(&[u8]) -> Result<usize, TransportError>,
) -> Result<usize, MacError> {
    let bytes = datagram.encode()?;
    if let Some(label) = &datagram.label {
        store.set_object_label(handle, label)?;
    }
    let sent = match transmit(&bytes) {
        Ok(sent) => sent,
        Err(e) => {
            store.release_object(handle);
            return Err(e.into());
        }
    };
    store.seal_object(handle)?;
    Ok(sent)
}

#[derive(Debug)]
pub struct RawSender {
    socket: OwnedFd,
    sent: u64,
}

impl RawSender {
    pub fn open<B: LabelBackend, P: PrivilegeBackend>(
        store: &LabelStore<B, P>,
    ) -> Result<Self, MacError> {
        Ok(Self { socket: open_raw(store, ipproto::RAW)?, sent: 0 })
    }

    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::Socket(self.socket.as_raw_fd())
    }

    /// Labels the socket with the label of `datagram` and sends it.
    ///
    /// Returns the sealed handle of the packet, which the caller releases, and
    /// the number of bytes handed to the kernel.
    pub fn send<B: LabelBackend, P: PrivilegeBackend>(
        &mut self,
        store: &LabelStore<B, P>,
        datagram: &LabeledDatagram,
    ) -> Result<(ObjectHandle, usize), MacError> {
        if let Some(label) = &datagram.label {
            store.set_object_label(self.handle(), label)?;
        }
        self.sent += 1;
        let packet = ObjectHandle::Packet(self.sent);
        let sent = dispatch_outbound(store, packet, datagram, |bytes| {
            sendto(&self.socket, bytes, SendFlags::empty(), &datagram.destination)
                .map_err(TransportError::from)
        })?;
        info!(
            %packet,
            destination = %datagram.destination,
            label = ?datagram.label.as_ref().map(ToString::to_string),
            sent,
            "[sender] datagram sent"
        );
        Ok((packet, sent))
    }

    /// Releases the socket binding and closes the socket.
    pub fn close<B: LabelBackend, P: PrivilegeBackend>(self, store: &LabelStore<B, P>) {
        store.release_object(self.handle());
    }
}

#[derive(Debug)]
pub struct RawReceiver {
    socket: OwnedFd,
    port: u16,
    received: u64,
}

impl RawReceiver {
    /// Opens a raw UDP socket; only datagrams addressed to `port` are delivered.
    pub fn open<B: LabelBackend, P: PrivilegeBackend>(
        store: &LabelStore<B, P>,
        port: u16,
    ) -> Result<Self, MacError> {
        Ok(Self { socket: open_raw(store, ipproto::UDP)?, port, received: 0 })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Blocks until a datagram for the port arrives.
    ///
    /// Packets that do not decode are skipped. The returned handle carries the
    /// datagram label, if binding it succeeded.
    pub fn receive<B: LabelBackend, P: PrivilegeBackend>(
        &mut self,
        store: &LabelStore<B, P>,
    ) -> Result<(ObjectHandle, LabeledDatagram), MacError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, _, _) = recvfrom(&self.socket, &mut buffer[..], RecvFlags::empty())
                .map_err(TransportError::from)?;
            let datagram = match LabeledDatagram::decode(&buffer[..len]) {
                Ok(datagram) => datagram,
                Err(e) => {
                    debug!("[receiver] packet dropped: {e}");
                    continue;
                }
            };
            if datagram.destination.port() != self.port {
                continue;
            }

            self.received += 1;
            let handle = ObjectHandle::Packet(self.received);
            if let Err(e) = accept_inbound(store, handle, &datagram) {
                warn!(%handle, "[receiver] label not bound: {e}");
            }
            return Ok((handle, datagram));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::{
        capability::mock::MockPrivileges,
        error::{CapabilityError, QueryError},
        label::Label,
        store::memory::MemoryBackend,
    };

    fn datagram() -> LabeledDatagram {
        LabeledDatagram::new(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_SOURCE_PORT),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PACKET_PORT),
            b"payload".to_vec(),
        )
    }

    #[test]
    fn unit_raw_socket_requires_priv_sock() {
        let privileges = MockPrivileges::new(CapabilitySet::SET_MAC);
        let store = LabelStore::new(MemoryBackend::new(), privileges.clone());

        assert!(matches!(
            RawSender::open(&store),
            Err(MacError::Capability(CapabilityError::ElevationDenied { .. }))
        ));
        assert!(matches!(
            RawReceiver::open(&store, DEFAULT_PACKET_PORT),
            Err(MacError::Capability(CapabilityError::ElevationDenied { .. }))
        ));
        assert_eq!(privileges.elevations(), 0);
        assert_eq!(privileges.effective(), CapabilitySet::empty());
    }

    #[test]
    fn unit_raw_inbound_label_is_recoverable() {
        let store = LabelStore::new(MemoryBackend::new(), MockPrivileges::default());
        let handle = ObjectHandle::Packet(1);

        accept_inbound(&store, handle, &datagram().with_label(Label::object(2, [3]))).unwrap();

        assert_eq!(store.get_object_label(handle).unwrap(), Label::object(2, [3]));
        // In flight
        assert!(store.set_object_label(handle, &Label::object(0, [])).is_err());
    }

    #[test]
    fn unit_raw_outbound_packet_sealed_in_flight() {
        let store = LabelStore::new(MemoryBackend::new(), MockPrivileges::default());
        let handle = ObjectHandle::Packet(1);
        let datagram = datagram().with_label(Label::object(2, [5]));

        let sent = dispatch_outbound(&store, handle, &datagram, |bytes| {
            // Labeled before it leaves
            assert_eq!(store.get_object_label(handle).unwrap(), Label::object(2, [5]));
            Ok(bytes.len())
        })
        .unwrap();

        assert_eq!(sent, datagram.encode().unwrap().len());
        assert_eq!(store.get_object_label(handle).unwrap(), Label::object(2, [5]));
        assert!(store.set_object_label(handle, &Label::object(0, [])).is_err());
    }

    #[test]
    fn unit_raw_failed_transmit_leaves_no_binding() {
        let store = LabelStore::new(MemoryBackend::new(), MockPrivileges::default());
        let handle = ObjectHandle::Packet(2);

        let result = dispatch_outbound(
            &store,
            handle,
            &datagram().with_label(Label::object(1, [])),
            |_| Err(TransportError::Io("network unreachable".to_string())),
        );

        assert!(matches!(result, Err(MacError::Transport(TransportError::Io(_)))));
        assert_eq!(store.backend().bound_objects(), 0);
    }

    #[test]
    fn unit_raw_outbound_label_needs_set_mac() {
        let privileges = MockPrivileges::new(CapabilitySet::PRIV_SOCK);
        let store = LabelStore::new(MemoryBackend::new(), privileges);
        let mut transmitted = false;

        let result = dispatch_outbound(
            &store,
            ObjectHandle::Packet(3),
            &datagram().with_label(Label::object(1, [])),
            |bytes| {
                transmitted = true;
                Ok(bytes.len())
            },
        );

        assert!(result.is_err());
        assert!(!transmitted);
    }

    #[test]
    fn unit_raw_unlabeled_inbound_is_query_error() {
        let store = LabelStore::new(MemoryBackend::new(), MockPrivileges::default());
        let handle = ObjectHandle::Packet(2);

        accept_inbound(&store, handle, &datagram()).unwrap();

        assert!(matches!(store.get_object_label(handle), Err(QueryError::Unlabeled(_))));
        assert!(store.set_object_label(handle, &Label::object(1, [])).is_err());
    }
}
