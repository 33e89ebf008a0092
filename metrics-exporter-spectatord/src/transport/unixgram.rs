use std::{
    io,
    os::unix::net::UnixDatagram,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

/// Establishes connections for a [`Connection`].
pub(crate) trait Dialer {
    type Socket;

    /// Opens a new, connected socket.
    fn dial(&self) -> io::Result<Self::Socket>;

    /// Sends a payload over a connected socket.
    fn send(&self, socket: &Self::Socket, payload: &[u8]) -> io::Result<usize>;
}

struct PathDialer {
    path: PathBuf,
}

impl Dialer for PathDialer {
    type Socket = UnixDatagram;

    fn dial(&self) -> io::Result<UnixDatagram> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(&self.path)?;
        Ok(socket)
    }

    fn send(&self, socket: &UnixDatagram, payload: &[u8]) -> io::Result<usize> {
        socket.send(payload)
    }
}

enum ConnectionState<S> {
    // The peer went away; the next send dials before sending.
    Disconnected,

    // Connected and ready to send.
    Ready(S),

    // Closed by the owner; every send is dropped.
    Closed,
}

/// Returns `true` if the error means the peer endpoint is gone, and the socket must be re-dialed.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotFound
    )
}

/// A datagram connection that reconnects lazily.
///
/// When a send fails because the peer is gone, the socket is dropped. The next send dials again before sending, and a
/// failed dial drops that payload. Dialing is attempted again on every subsequent send, without any backoff.
pub(crate) struct Connection<D: Dialer> {
    dialer: D,
    state: Mutex<ConnectionState<D::Socket>>,
}

impl<D: Dialer> Connection<D> {
    /// Dials immediately, returning an error if the peer cannot be reached.
    pub fn connect(dialer: D) -> io::Result<Self> {
        let socket = dialer.dial()?;
        Ok(Self { dialer, state: Mutex::new(ConnectionState::Ready(socket)) })
    }

    /// Sends a payload, reconnecting first if the connection was previously lost.
    pub fn try_send(&self, payload: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                ConnectionState::Closed => {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
                }
                ConnectionState::Disconnected => {
                    let socket = self.dialer.dial()?;
                    info!("Reconnected to datagram peer.");
                    *state = ConnectionState::Ready(socket);
                }
                ConnectionState::Ready(socket) => {
                    let result = self.dialer.send(socket, payload);
                    if let Err(e) = &result {
                        if is_disconnect(e) {
                            warn!(error = %e, "Datagram peer disconnected, will reconnect on next send.");
                            *state = ConnectionState::Disconnected;
                        }
                    }
                    return result;
                }
            }
        }
    }

    /// Returns `true` if the connection currently holds a connected socket.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Ready(_))
    }

    /// Drops the socket, and stops any further sends or reconnections.
    pub fn close(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }
}

/// Sends payloads as datagrams over a Unix domain socket.
///
/// If the daemon goes away, the socket is re-dialed lazily on the next send. Payloads sent while the daemon cannot be
/// reached are dropped.
pub struct UnixgramTransport {
    path: PathBuf,
    connection: Connection<PathDialer>,
}

impl UnixgramTransport {
    /// Connects to the Unix datagram socket at `path`.
    ///
    /// # Errors
    ///
    /// If the socket cannot be reached, an error is returned.
    pub fn connect(path: &Path) -> io::Result<Self> {
        let connection = Connection::connect(PathDialer { path: path.to_path_buf() })?;
        debug!(path = %path.display(), "Connected Unix datagram transport.");
        Ok(Self { path: path.to_path_buf(), connection })
    }

    /// Returns the socket path datagrams are sent to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the transport currently holds a connected socket.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub(super) fn send(&self, payload: &[u8]) {
        if let Err(e) = self.connection.try_send(payload) {
            error!(error = %e, path = %self.path.display(), payload_len = payload.len(), "Failed to send payload.");
        }
    }

    pub(super) fn close(&self) {
        self.connection.close();
    }
}
