//! Errors raised while a plugin binary starts serving.

use std::io;

use thiserror::Error;

use crate::handshake::{NETWORK_ENV, PROTOCOL_VERSION_ENV};
use crate::telemetry::TelemetryError;
use crate::transport::{Network, UnknownNetwork};

/// Errors surfaced by [`serve`](super::serve) and the plugin listener.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The binary was started without a host.
    #[error(
        "this binary is a plugin and is not meant to be executed directly; \
         run it through a tether host ({PROTOCOL_VERSION_ENV} is not set)"
    )]
    NotLaunchedByHost,

    /// The host requested an unrecognised transport.
    #[error("invalid {NETWORK_ENV}: {0}")]
    Network(#[from] UnknownNetwork),

    /// The requested transport is not available on this platform.
    #[error("{0} listeners are unsupported on this platform")]
    Unsupported(Network),

    /// The listener could not be bound.
    #[error("failed to bind {network} listener at {address}: {source}")]
    Bind {
        /// Requested transport.
        network: Network,
        /// Address or path that was requested.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A stale Unix socket file could not be removed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The listener could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The handshake line could not be written.
    #[error("failed to announce handshake: {source}")]
    Announce {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The host presented a different secret than the plugin was built with.
    #[error("host did not present the expected value for {key}")]
    CookieMismatch {
        /// Name of the secret key.
        key: String,
    },

    /// Plugin logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The accept loop thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
