//! Domain errors raised by plugin host operations.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. Every variant names the plugin it
//! concerns, and RPC-level variants also name the method. I/O errors are
//! wrapped in `Arc` to satisfy the `result_large_err` Clippy lint.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::handshake::HandshakeField;

/// Errors arising from plugin host operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin executable path is missing, a directory, or not executable.
    #[error("plugin '{name}' has an unusable executable path {path}: {reason}")]
    InvalidPath {
        /// Plugin name.
        name: String,
        /// Path that was checked.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The plugin process could not be spawned.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The plugin process exited before announcing its transport.
    #[error("plugin '{name}' exited before completing the handshake ({status})")]
    StartupFailed {
        /// Plugin name.
        name: String,
        /// Exit status description.
        status: String,
    },

    /// The handshake line could not be parsed.
    #[error("plugin '{name}' wrote an invalid handshake line '{line}': {message}")]
    InvalidHandshake {
        /// Plugin name.
        name: String,
        /// Raw handshake line as read from stdout.
        line: String,
        /// Description of the protocol violation.
        message: String,
    },

    /// The plugin announced a protocol version or secret that does not match.
    #[error("plugin '{name}' handshake mismatch on {field}: expected '{expected}', got '{actual}'")]
    HandshakeMismatch {
        /// Plugin name.
        name: String,
        /// Field that differed.
        field: HandshakeField,
        /// Value the host expected.
        expected: String,
        /// Value the plugin reported.
        actual: String,
    },

    /// The plugin process could not be stopped.
    #[error("plugin '{name}' could not be terminated: {message}")]
    TerminateFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The plugin did not respond within the configured deadline.
    #[error("plugin '{name}' timed out during {operation} after {timeout_ms}ms")]
    Timeout {
        /// Plugin name.
        name: String,
        /// Operation that timed out (`handshake` or the RPC method).
        operation: String,
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The channel to the plugin is closed or unreachable.
    #[error("transport error communicating with plugin '{name}': {message}")]
    Transport {
        /// Plugin name.
        name: String,
        /// Description of the failure.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The plugin does not export the requested method.
    #[error("plugin '{name}' has no method '{method}'")]
    MethodNotFound {
        /// Plugin name.
        name: String,
        /// Method that was requested.
        method: String,
    },

    /// The plugin rejected the arguments for a method.
    #[error("plugin '{name}' rejected arguments for '{method}': {message}")]
    BadArguments {
        /// Plugin name.
        name: String,
        /// Method that was invoked.
        method: String,
        /// Description of the arity or shape mismatch.
        message: String,
    },

    /// The plugin implementation returned a structured failure.
    #[error("plugin '{name}' method '{method}' failed: {message}")]
    Remote {
        /// Plugin name.
        name: String,
        /// Method that was invoked.
        method: String,
        /// Failure message reported by the plugin.
        message: String,
    },

    /// The ABI generation target does not expose its operations.
    #[error("plugin '{name}' cannot be introspected: {message}")]
    NotIntrospectable {
        /// Plugin name.
        name: String,
        /// Why introspection failed.
        message: String,
    },

    /// The requested plugin has not been loaded.
    #[error("plugin '{name}' is not loaded")]
    NotLoaded {
        /// Name that was looked up.
        name: String,
    },

    /// A plugin with the same name is already loaded or loading.
    #[error("plugin '{name}' is already loaded")]
    AlreadyLoaded {
        /// Conflicting plugin name.
        name: String,
    },

    /// A plugin descriptor or registry configuration failed validation.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the validation failure.
        message: String,
    },

    /// A request envelope could not be serialised to JSON.
    #[error("failed to serialise plugin request: {0}")]
    SerializeRequest(#[source] serde_json::Error),

    /// A response envelope could not be deserialised from JSON.
    #[error("failed to deserialise plugin response: {message}")]
    DeserializeResponse {
        /// Human-readable description of the parse failure.
        message: String,
        /// Optional underlying JSON error.
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl PluginError {
    /// Builds a transport error from an I/O failure.
    #[must_use]
    pub fn transport(name: &str, source: std::io::Error) -> Self {
        Self::Transport {
            name: name.to_owned(),
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` for failures raised by the remote call layer.
    ///
    /// These never tear down the connection; the plugin stays usable.
    #[must_use]
    pub const fn is_call_level(&self) -> bool {
        matches!(
            self,
            Self::MethodNotFound { .. } | Self::BadArguments { .. } | Self::Remote { .. }
        )
    }
}

#[cfg(test)]
mod tests;
