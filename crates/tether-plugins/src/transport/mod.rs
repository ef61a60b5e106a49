//! Socket endpoints and JSONL-framed duplex channels.
//!
//! Every RPC envelope travels as one JSON document terminated by a newline.
//! Plugins listen on a loopback TCP port or a Unix domain socket and announce
//! the [`Endpoint`] in their handshake line; the host opens a fresh
//! [`Channel`] to that endpoint for each dispensed client.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Socket family a plugin listens on.
///
/// # Example
///
/// ```
/// use tether_plugins::transport::Network;
///
/// let network: Network = "unix".parse().expect("known network");
/// assert_eq!(network, Network::Unix);
/// assert_eq!(Network::Tcp.as_str(), "tcp");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Loopback TCP.
    #[default]
    Tcp,
    /// Unix domain socket.
    Unix,
}

impl Network {
    /// Returns the canonical name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a network name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown network '{0}'")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "unix" => Ok(Self::Unix),
            _ => Err(UnknownNetwork(value.to_owned())),
        }
    }
}

/// Address a plugin announced in its handshake line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Loopback TCP socket address.
    Tcp(SocketAddr),
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parses an address announced for `network`.
    #[must_use]
    pub fn parse(network: Network, address: &str) -> Option<Self> {
        let address = address.trim();
        match network {
            Network::Tcp => address.parse().ok().map(Self::Tcp),
            Network::Unix if !address.is_empty() => Some(Self::Unix(PathBuf::from(address))),
            Network::Unix => None,
        }
    }

    /// Returns the socket family.
    #[must_use]
    pub const fn network(&self) -> Network {
        match self {
            Self::Tcp(_) => Network::Tcp,
            Self::Unix(_) => Network::Unix,
        }
    }

    /// Returns the address portion as written on the wire.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp(addr) => addr.to_string(),
            Self::Unix(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network(), self.address())
    }
}

/// Errors raised while moving frames across a channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during connect, read, or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the channel.
    #[error("channel closed by peer")]
    Closed,

    /// A frame exceeded [`MAX_FRAME_BYTES`] without a terminating newline.
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    Oversized,

    /// The endpoint's socket family is not available on this platform.
    #[error("{0} sockets are unsupported on this platform")]
    Unsupported(Network),
}

impl TransportError {
    /// Returns `true` when the failure is a read or write deadline expiring.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// A connected socket of either family.
#[derive(Debug)]
pub enum ConnectionStream {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix domain stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Connects to `endpoint`, giving up after `timeout` for TCP.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the connection is refused or times
    /// out, and [`TransportError::Unsupported`] for Unix endpoints on
    /// platforms without Unix sockets.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpStream::connect_timeout(addr, timeout)?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(Network::Unix)),
        }
    }

    /// Sets the deadline applied to every subsequent read and write.
    ///
    /// # Errors
    ///
    /// Propagates the socket option failure.
    pub fn set_deadline(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
            #[cfg(unix)]
            Self::Unix(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
        }
    }

    /// Clones the underlying handle so reads and writes can be buffered
    /// independently.
    ///
    /// # Errors
    ///
    /// Propagates the descriptor duplication failure.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Reads and writes newline-delimited frames over any duplex byte stream.
pub struct Channel {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
}

impl Channel {
    /// Creates a channel over arbitrary reader and writer halves.
    #[must_use]
    pub fn new(reader: impl Read + Send + 'static, writer: impl Write + Send + 'static) -> Self {
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(BufWriter::new(writer)),
        }
    }

    /// Wraps a connected socket.
    ///
    /// # Errors
    ///
    /// Propagates the failure to duplicate the socket handle.
    pub fn from_stream(stream: ConnectionStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Self::new(reader, stream))
    }

    /// Connects to `endpoint` and applies `timeout` as the per-frame deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the endpoint is unreachable or the
    /// socket cannot be configured.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, TransportError> {
        let stream = ConnectionStream::connect(endpoint, timeout)?;
        stream.set_deadline(Some(timeout))?;
        Ok(Self::from_stream(stream)?)
    }

    /// Writes one frame followed by a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if writing fails.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(frame)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Reads one frame, blocking until a newline, EOF, or the deadline.
    ///
    /// Returns `Ok(None)` when the peer closed the channel cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Oversized`] when a frame exceeds the size
    /// limit and [`TransportError::Io`] on read failure or timeout.
    pub fn receive(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_FRAME_BYTES)
            .read_line(&mut line)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && u64::try_from(bytes_read).unwrap_or(u64::MAX) >= MAX_FRAME_BYTES
        {
            return Err(TransportError::Oversized);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
    }

    /// Reads one frame, treating EOF as [`TransportError::Closed`].
    ///
    /// # Errors
    ///
    /// As [`Channel::receive`], plus [`TransportError::Closed`] at EOF.
    pub fn receive_required(&mut self) -> Result<String, TransportError> {
        self.receive()?.ok_or(TransportError::Closed)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}
