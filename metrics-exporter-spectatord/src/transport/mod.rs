use std::{
    fmt,
    io::{self, Write as _},
    path::PathBuf,
    str::FromStr,
};

use tracing::error;

use crate::builder::BuildError;

mod file;
pub use self::file::FileTransport;

mod memory;
pub use self::memory::MemoryTransport;

mod udp;
pub use self::udp::UdpTransport;

#[cfg(unix)]
mod unixgram;
#[cfg(unix)]
pub use self::unixgram::UnixgramTransport;

/// Address used for the bare `udp` location.
pub const DEFAULT_UDP_ADDRESS: &str = "127.0.0.1:1234";

/// Socket path used for the bare `unix` location.
pub const DEFAULT_UNIX_PATH: &str = "/run/spectatord/spectatord.unix";

/// Where protocol lines are written to.
///
/// Locations are parsed from strings:
///
/// - `none`: discard everything
/// - `memory`: keep every payload in memory, for inspection in tests
/// - `stdout` / `stderr`: print one payload per line
/// - `file://<path>`: append one payload per line to a file
/// - `udp` or `udp://<host>:<port>`: send datagrams over UDP, defaulting to [`DEFAULT_UDP_ADDRESS`]
/// - `unix` or `unix://<path>`: send datagrams over a Unix domain socket, defaulting to [`DEFAULT_UNIX_PATH`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// Discard all output.
    None,

    /// Keep output in memory.
    Memory,

    /// Print output to standard output.
    Stdout,

    /// Print output to standard error.
    Stderr,

    /// Append output to a file.
    File(PathBuf),

    /// Send output to a UDP `<host>:<port>` address.
    Udp(String),

    /// Send output to a Unix datagram socket.
    Unix(PathBuf),
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => return Err("location must not be empty".to_string()),
            "none" => return Ok(Location::None),
            "memory" => return Ok(Location::Memory),
            "stdout" => return Ok(Location::Stdout),
            "stderr" => return Ok(Location::Stderr),
            "udp" => return Ok(Location::Udp(DEFAULT_UDP_ADDRESS.to_string())),
            "unix" => return Ok(Location::Unix(PathBuf::from(DEFAULT_UNIX_PATH))),
            _ => {}
        }

        let Some((scheme, rest)) = s.split_once("://") else {
            return Err("expected one of 'none', 'memory', 'stdout', 'stderr', 'udp', 'unix' or a URL".to_string());
        };
        if rest.is_empty() {
            return Err(format!("missing target after '{}://'", scheme));
        }

        match scheme {
            "file" => Ok(Location::File(PathBuf::from(rest))),
            "udp" => Ok(Location::Udp(rest.to_string())),
            "unix" => Ok(Location::Unix(PathBuf::from(rest))),
            _ => Err(format!("invalid scheme '{}' (expected 'file', 'udp' or 'unix')", scheme)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::None => f.write_str("none"),
            Location::Memory => f.write_str("memory"),
            Location::Stdout => f.write_str("stdout"),
            Location::Stderr => f.write_str("stderr"),
            Location::File(path) => write!(f, "file://{}", path.display()),
            Location::Udp(addr) => write!(f, "udp://{}", addr),
            Location::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Returns `true` if `location` can be parsed as a [`Location`].
pub fn is_valid_location(location: &str) -> bool {
    location.parse::<Location>().is_ok()
}

/// The destination of raw payloads.
///
/// Sending never fails from the caller's point of view: a payload that cannot be delivered is logged and dropped, since
/// recording a metric must never interrupt the application.
pub enum Transport {
    /// Discards every payload.
    Noop,

    /// Keeps every payload in memory.
    Memory(MemoryTransport),

    /// Prints every payload to standard output.
    Stdout,

    /// Prints every payload to standard error.
    Stderr,

    /// Appends every payload to a file.
    File(FileTransport),

    /// Sends every payload as a UDP datagram.
    Udp(UdpTransport),

    /// Sends every payload as a Unix domain datagram.
    #[cfg(unix)]
    Unixgram(UnixgramTransport),
}

impl Transport {
    /// Opens the transport for the given location.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened, the UDP address cannot be resolved, or the Unix socket cannot be reached, an error
    /// is returned.
    pub fn open(location: &Location) -> Result<Self, BuildError> {
        match location {
            Location::None => Ok(Transport::Noop),
            Location::Memory => Ok(Transport::Memory(MemoryTransport::default())),
            Location::Stdout => Ok(Transport::Stdout),
            Location::Stderr => Ok(Transport::Stderr),
            Location::File(path) => FileTransport::open(path)
                .map(Transport::File)
                .map_err(|source| BuildError::Connect { location: location.to_string(), source }),
            Location::Udp(addr) => UdpTransport::connect(addr).map(Transport::Udp),

            #[cfg(unix)]
            Location::Unix(path) => UnixgramTransport::connect(path)
                .map(Transport::Unixgram)
                .map_err(|source| BuildError::Connect { location: location.to_string(), source }),

            #[cfg(not(unix))]
            Location::Unix(_) => Err(BuildError::InvalidLocation {
                location: location.to_string(),
                reason: "Unix domain sockets are not supported on this platform".to_string(),
            }),
        }
    }

    /// Returns the transport ID, such as `udp` for UDP.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            Transport::Noop => "none",
            Transport::Memory(_) => "memory",
            Transport::Stdout => "stdout",
            Transport::Stderr => "stderr",
            Transport::File(_) => "file",
            Transport::Udp(_) => "udp",
            #[cfg(unix)]
            Transport::Unixgram(_) => "unix",
        }
    }

    /// Returns the in-memory transport, if this is one.
    pub fn as_memory(&self) -> Option<&MemoryTransport> {
        match self {
            Transport::Memory(memory) => Some(memory),
            _ => None,
        }
    }

    /// Sends a single payload.
    pub fn send(&self, payload: &[u8]) {
        match self {
            Transport::Noop => {}
            Transport::Memory(memory) => memory.send(payload),
            Transport::Stdout => {
                if let Err(e) = print_line(&mut io::stdout().lock(), payload) {
                    error!(error = %e, "Failed to write payload to stdout.");
                }
            }
            Transport::Stderr => {
                if let Err(e) = print_line(&mut io::stderr().lock(), payload) {
                    error!(error = %e, "Failed to write payload to stderr.");
                }
            }
            Transport::File(file) => file.send(payload),
            Transport::Udp(udp) => udp.send(payload),
            #[cfg(unix)]
            Transport::Unixgram(unixgram) => unixgram.send(payload),
        }
    }

    /// Closes the transport.
    ///
    /// Payloads sent after closing are dropped.
    ///
    /// # Errors
    ///
    /// If the underlying file cannot be flushed, an error is returned.
    pub fn close(&self) -> io::Result<()> {
        match self {
            Transport::Noop | Transport::Memory(_) => Ok(()),
            Transport::Stdout => io::stdout().flush(),
            Transport::Stderr => io::stderr().flush(),
            Transport::File(file) => file.close(),
            Transport::Udp(udp) => {
                udp.close();
                Ok(())
            }
            #[cfg(unix)]
            Transport::Unixgram(unixgram) => {
                unixgram.close();
                Ok(())
            }
        }
    }
}

fn print_line<W: io::Write>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    out.write_all(payload)?;
    out.write_all(b"\n")
}
