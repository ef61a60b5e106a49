//! Plugin half of the handshake and the blocking serve entrypoint.

use std::env;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::{info, warn};

use super::{MethodTable, PluginListener, SERVER_TARGET, ServeError, ServerHandle};
use crate::handshake::{HandshakeConfig, HandshakeLine, NETWORK_ENV, PROTOCOL_VERSION_ENV};
use crate::telemetry;
use crate::transport::Network;

/// What the host told the plugin through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    protocol_version: String,
    network: Network,
    magic_cookie: Option<String>,
}

impl HostEnvironment {
    /// Creates an environment description directly.
    #[must_use]
    pub const fn new(
        protocol_version: String,
        network: Network,
        magic_cookie: Option<String>,
    ) -> Self {
        Self {
            protocol_version,
            network,
            magic_cookie,
        }
    }

    /// Reads the host's expectations from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::NotLaunchedByHost`] when the protocol version
    /// variable is absent and [`ServeError::Network`] when the requested
    /// transport is unknown.
    pub fn from_env(handshake: &HandshakeConfig) -> Result<Self, ServeError> {
        let protocol_version =
            env::var(PROTOCOL_VERSION_ENV).map_err(|_| ServeError::NotLaunchedByHost)?;
        let network = match env::var(NETWORK_ENV) {
            Ok(raw) => raw.parse()?,
            Err(_) => Network::default(),
        };
        let magic_cookie = env::var(handshake.magic_cookie_key()).ok();
        Ok(Self::new(protocol_version, network, magic_cookie))
    }

    /// Returns the protocol version the host advertised.
    #[must_use]
    pub const fn protocol_version(&self) -> &str {
        self.protocol_version.as_str()
    }

    /// Returns the requested transport.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Returns `true` when the host presented the plugin's secret value.
    #[must_use]
    pub fn presents_cookie(&self, handshake: &HandshakeConfig) -> bool {
        self.magic_cookie.as_deref() == Some(handshake.magic_cookie_value())
    }
}

/// Binds, announces the handshake line on `out`, and starts serving.
///
/// The line always carries the plugin's own compiled descriptor so a host
/// with different expectations can report exactly which field disagreed.
/// When the host did not present the expected secret the listener is dropped
/// after the announcement and no requests are served.
///
/// # Errors
///
/// Returns a [`ServeError`] when binding or announcing fails, or
/// [`ServeError::CookieMismatch`] when the host's secret differs.
pub fn start(
    table: MethodTable,
    handshake: &HandshakeConfig,
    host: &HostEnvironment,
    out: &mut dyn Write,
) -> Result<ServerHandle, ServeError> {
    let listener = PluginListener::bind(host.network(), table.name())?;
    let line = HandshakeLine::new(handshake.clone(), listener.endpoint().clone());
    writeln!(out, "{line}")
        .and_then(|()| out.flush())
        .map_err(|source| ServeError::Announce { source })?;

    if !host.presents_cookie(handshake) {
        warn!(
            target: SERVER_TARGET,
            plugin = table.name(),
            key = handshake.magic_cookie_key(),
            "host did not present the expected magic cookie"
        );
        return Err(ServeError::CookieMismatch {
            key: handshake.magic_cookie_key().to_owned(),
        });
    }

    info!(
        target: SERVER_TARGET,
        plugin = table.name(),
        version = table.version(),
        host_protocol = host.protocol_version(),
        endpoint = %listener.endpoint(),
        "serving plugin"
    );
    listener.spawn(Arc::new(table))
}

/// Runs a plugin binary: performs the handshake on stdout and serves until
/// the host terminates the process.
///
/// # Errors
///
/// Returns [`ServeError::NotLaunchedByHost`] when run directly, and any
/// error from [`start`].
pub fn serve(table: MethodTable, handshake: &HandshakeConfig) -> Result<(), ServeError> {
    let host = HostEnvironment::from_env(handshake)?;
    let handle = start(table, handshake, &host, &mut io::stdout().lock())?;
    handle.join()
}

/// Entrypoint for the reference plugin binaries.
///
/// Installs JSON telemetry on stderr and serves `table` behind the
/// conventional handshake from [`HandshakeConfig::for_plugin`].
///
/// # Errors
///
/// Returns [`ServeError::Telemetry`] when logging cannot be installed, and
/// any error from [`serve`].
pub fn run_plugin(table: MethodTable) -> Result<(), ServeError> {
    telemetry::initialise_plugin()?;
    let handshake = HandshakeConfig::for_plugin(table.name());
    serve(table, &handshake)
}
