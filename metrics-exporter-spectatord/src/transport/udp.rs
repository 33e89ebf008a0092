use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
};

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::builder::BuildError;

/// Sends payloads as UDP datagrams.
///
/// The socket is connected once, when the transport is created. Each payload is sent as a single datagram, and failed
/// sends are logged but never retried.
pub struct UdpTransport {
    peer: SocketAddr,
    socket: RwLock<Option<UdpSocket>>,
}

impl UdpTransport {
    /// Connects to the given `<host>:<port>` address.
    ///
    /// When the address resolves to multiple socket addresses, each is tried in turn until one can be connected to.
    ///
    /// # Errors
    ///
    /// If the address cannot be resolved, or a socket cannot be connected to any of the resolved addresses, an error is
    /// returned.
    pub fn connect(address: &str) -> Result<Self, BuildError> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|source| BuildError::Resolve { address: address.to_string(), source })?
            .collect::<Vec<_>>();

        let mut last_error = None;
        for addr in addrs {
            match connect_socket(addr) {
                Ok(socket) => {
                    debug!(%addr, "Connected UDP transport.");
                    return Ok(Self { peer: addr, socket: RwLock::new(Some(socket)) });
                }
                Err(e) => last_error = Some(e),
            }
        }

        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address did not resolve to any socket addresses")
        });
        Err(BuildError::Connect { location: format!("udp://{}", address), source })
    }

    /// Returns the address datagrams are sent to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub(super) fn send(&self, payload: &[u8]) {
        let socket = self.socket.read();
        let Some(socket) = socket.as_ref() else {
            debug!(peer = %self.peer, "Dropping payload for closed UDP transport.");
            return;
        };

        if let Err(e) = socket.send(payload) {
            error!(error = %e, peer = %self.peer, payload_len = payload.len(), "Failed to send payload.");
        }
    }

    pub(super) fn close(&self) {
        self.socket.write().take();
    }
}

fn connect_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    socket.connect(addr)?;
    Ok(socket)
}
