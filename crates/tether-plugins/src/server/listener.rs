//! Socket listener that accepts host connections for a plugin.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use super::{MethodTable, SERVER_TARGET, ServeError};
use crate::transport::{Channel, ConnectionStream, Endpoint, Network};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Listener bound to the endpoint a plugin announces in its handshake.
#[derive(Debug)]
pub struct PluginListener {
    endpoint: Endpoint,
    listener: ListenerKind,
}

impl PluginListener {
    /// Binds a listener for `network`.
    ///
    /// TCP listeners bind an ephemeral loopback port. Unix listeners bind a
    /// socket named after the plugin and process id in the temporary
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ServeError`] when binding fails.
    pub fn bind(network: Network, plugin_name: &str) -> Result<Self, ServeError> {
        match network {
            Network::Tcp => Self::bind_tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))),
            #[cfg(unix)]
            Network::Unix => Self::bind_unix(&default_socket_path(plugin_name)),
            #[cfg(not(unix))]
            Network::Unix => {
                let _ = plugin_name;
                Err(ServeError::Unsupported(Network::Unix))
            }
        }
    }

    /// Binds a TCP listener at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Bind`] when the address is unavailable.
    pub fn bind_tcp(addr: SocketAddr) -> Result<Self, ServeError> {
        let bind_error = |source| ServeError::Bind {
            network: Network::Tcp,
            address: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        Ok(Self {
            endpoint: Endpoint::Tcp(local),
            listener: ListenerKind::Tcp(listener),
        })
    }

    /// Binds a Unix listener at `path`, replacing a stale socket file.
    ///
    /// # Errors
    ///
    /// Returns a [`ServeError`] when the stale file cannot be removed or the
    /// socket cannot be bound.
    #[cfg(unix)]
    pub fn bind_unix(path: &Path) -> Result<Self, ServeError> {
        if path.exists() {
            fs::remove_file(path).map_err(|source| ServeError::StaleSocket {
                path: path.display().to_string(),
                source,
            })?;
        }
        let listener = UnixListener::bind(path).map_err(|source| ServeError::Bind {
            network: Network::Unix,
            address: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            endpoint: Endpoint::Unix(path.to_path_buf()),
            listener: ListenerKind::Unix(listener),
        })
    }

    /// Returns the bound endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Starts the accept loop on a background thread.
    ///
    /// Each accepted connection is served on its own thread until the peer
    /// closes it.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::NonBlocking`] if the listener cannot be polled.
    pub fn spawn(self, table: Arc<MethodTable>) -> Result<ServerHandle, ServeError> {
        let nonblocking = match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        };
        if let Err(source) = nonblocking {
            return Err(ServeError::NonBlocking { source });
        }

        let endpoint = self.endpoint.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || run_accept_loop(&self, &shutdown_flag, &table));
        Ok(ServerHandle {
            endpoint,
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for PluginListener {
    fn drop(&mut self) {
        cleanup_socket(&self.endpoint);
    }
}

/// Handle to a running accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    endpoint: Endpoint,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Returns the endpoint the loop is accepting on.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Asks the accept loop to stop after its current poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Blocks until the accept loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ThreadPanic`] if the loop panicked.
    pub fn join(mut self) -> Result<(), ServeError> {
        self.handle
            .take()
            .map_or(Ok(()), |handle| handle.join().map_err(|_| ServeError::ThreadPanic))
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(listener: &PluginListener, shutdown: &AtomicBool, table: &Arc<MethodTable>) {
    info!(
        target: SERVER_TARGET,
        plugin = table.name(),
        endpoint = %listener.endpoint,
        "plugin listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(listener) {
            Ok(Some(stream)) => {
                last_error = None;
                let connection_table = Arc::clone(table);
                thread::spawn(move || serve_connection(&connection_table, stream));
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

fn accept_connection(listener: &PluginListener) -> io::Result<Option<ConnectionStream>> {
    match &listener.listener {
        ListenerKind::Tcp(tcp) => match tcp.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Tcp(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
        #[cfg(unix)]
        ListenerKind::Unix(unix) => match unix.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Unix(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
    }
}

fn serve_connection(table: &MethodTable, stream: ConnectionStream) {
    let result = Channel::from_stream(stream)
        .map_err(crate::transport::TransportError::from)
        .and_then(|mut channel| table.serve_channel(&mut channel));
    match result {
        Ok(()) => debug!(
            target: SERVER_TARGET,
            plugin = table.name(),
            "connection closed by host"
        ),
        Err(error) => warn!(
            target: SERVER_TARGET,
            plugin = table.name(),
            error = %error,
            "connection terminated"
        ),
    }
}

/// Builds the socket path a plugin uses when asked for a Unix transport.
#[cfg(unix)]
#[must_use]
pub(crate) fn default_socket_path(plugin_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tether-{plugin_name}-{}.sock", std::process::id()))
}

/// Removes the socket file of a Unix endpoint, ignoring a missing file.
#[cfg(unix)]
pub(crate) fn cleanup_socket(endpoint: &Endpoint) {
    let Endpoint::Unix(path) = endpoint else {
        return;
    };
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: SERVER_TARGET,
            error = %error,
            path = %path.display(),
            "failed to remove unix socket file"
        );
    }
}

/// Unix endpoints never exist on this platform.
#[cfg(not(unix))]
pub(crate) const fn cleanup_socket(_endpoint: &Endpoint) {}
