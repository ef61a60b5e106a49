//! Plugin descriptors and the registry configuration file.
//!
//! A [`PluginDescriptor`] tells the host manager everything it needs before a
//! spawn: the logical name, the executable, the handshake to expect, optional
//! arguments, an optional static ABI, and per-plugin timeouts. A
//! [`RegistryConfig`] is the JSON file listing many descriptors.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abi::PluginAbi;
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::transport::Network;

/// Default deadline for the plugin's handshake line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read deadline for a single remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

fn default_handshake_ms() -> u64 {
    duration_ms(DEFAULT_HANDSHAKE_TIMEOUT)
}

fn default_call_ms() -> u64 {
    duration_ms(DEFAULT_CALL_TIMEOUT)
}

/// Converts a duration to whole milliseconds, saturating.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handshake and per-call deadlines for one plugin.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_plugins::manifest::Timeouts;
///
/// let timeouts = Timeouts::default();
/// assert_eq!(timeouts.handshake(), Duration::from_secs(10));
/// assert_eq!(timeouts.call(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_handshake_ms")]
    handshake_ms: u64,
    #[serde(default = "default_call_ms")]
    call_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_CALL_TIMEOUT)
    }
}

impl Timeouts {
    /// Creates a timeout pair.
    #[must_use]
    pub fn new(handshake: Duration, call: Duration) -> Self {
        Self {
            handshake_ms: duration_ms(handshake),
            call_ms: duration_ms(call),
        }
    }

    /// Returns the handshake deadline.
    #[must_use]
    pub const fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    /// Returns the per-call read deadline.
    #[must_use]
    pub const fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}

/// Everything the host needs to launch and talk to one plugin.
///
/// Descriptors are built from configuration before any spawn and are not
/// modified once loaded.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use tether_plugins::HandshakeConfig;
/// use tether_plugins::manifest::PluginDescriptor;
///
/// let descriptor = PluginDescriptor::new(
///     "calc",
///     PathBuf::from("/opt/plugins/calculator"),
///     HandshakeConfig::new(1, "TETHER_CALC", "calculator"),
/// );
/// assert_eq!(descriptor.name(), "calc");
/// assert!(descriptor.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    name: String,
    path: PathBuf,
    handshake: HandshakeConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default)]
    network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abi: Option<PluginAbi>,
    #[serde(default)]
    timeouts: Timeouts,
}

impl PluginDescriptor {
    /// Creates a descriptor with default timeouts, TCP transport, no extra
    /// arguments and no static ABI.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, handshake: HandshakeConfig) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            handshake,
            args: Vec::new(),
            network: Network::default(),
            abi: None,
            timeouts: Timeouts::default(),
        }
    }

    /// Sets the arguments passed to the executable.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Selects the transport the plugin should listen on.
    #[must_use]
    pub const fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Supplies an ABI so the host skips the `describe` round trip.
    #[must_use]
    pub fn with_abi(mut self, abi: PluginAbi) -> Self {
        self.abi = Some(abi);
        self
    }

    /// Overrides the default deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Checks the fields that can be validated without touching the
    /// filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] for an empty or whitespace-bearing
    /// name, an empty path, a zero timeout, or cookie fields the handshake
    /// cannot carry.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Config {
                message: String::from("plugin name must not be empty"),
            });
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(PluginError::Config {
                message: format!("plugin name '{}' must not contain whitespace", self.name),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(PluginError::Config {
                message: format!("plugin '{}' has an empty executable path", self.name),
            });
        }
        if self.timeouts.handshake().is_zero() || self.timeouts.call().is_zero() {
            return Err(PluginError::Config {
                message: format!("plugin '{}' timeouts must be greater than zero", self.name),
            });
        }
        self.handshake
            .validate()
            .map_err(|err| PluginError::Config {
                message: format!("plugin '{}' handshake: {err}", self.name),
            })
    }

    /// Returns the logical name used as the registry key.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the handshake the plugin must announce.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeConfig {
        &self.handshake
    }

    /// Returns the executable arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the requested transport.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Returns the static ABI, if one was supplied.
    #[must_use]
    pub const fn abi(&self) -> Option<&PluginAbi> {
        self.abi.as_ref()
    }

    /// Returns the deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn resolve_against(mut self, base: &Path) -> Self {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        self
    }
}

/// Registry configuration file: one descriptor per plugin.
///
/// # Example
///
/// ```
/// use tether_plugins::manifest::RegistryConfig;
///
/// let config = RegistryConfig::from_json(r#"{
///     "plugins": [{
///         "name": "calc",
///         "path": "/opt/plugins/calculator",
///         "handshake": {
///             "protocol_version": 1,
///             "magic_cookie_key": "TETHER_CALC",
///             "magic_cookie_value": "calculator"
///         }
///     }]
/// }"#).expect("valid config");
/// assert_eq!(config.plugins().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    plugins: Vec<PluginDescriptor>,
}

impl RegistryConfig {
    /// Creates a configuration from descriptors.
    #[must_use]
    pub const fn new(plugins: Vec<PluginDescriptor>) -> Self {
        Self { plugins }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] when the document is malformed, a
    /// descriptor is invalid, or two descriptors share a name.
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        let config: Self = serde_json::from_str(json).map_err(|err| PluginError::Config {
            message: format!("invalid registry configuration: {err}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file.
    ///
    /// Relative executable paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] when the file cannot be read or fails
    /// [`RegistryConfig::from_json`].
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let contents = fs::read_to_string(path).map_err(|err| PluginError::Config {
            message: format!("failed to read {}: {err}", path.display()),
        })?;
        let config = Self::from_json(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            plugins: config
                .plugins
                .into_iter()
                .map(|descriptor| descriptor.resolve_against(base))
                .collect(),
        })
    }

    /// Validates every descriptor and rejects duplicate names.
    ///
    /// # Errors
    ///
    /// Returns the first [`PluginError::Config`] found.
    pub fn validate(&self) -> Result<(), PluginError> {
        let mut seen = HashSet::new();
        for descriptor in &self.plugins {
            descriptor.validate()?;
            if !seen.insert(descriptor.name()) {
                return Err(PluginError::Config {
                    message: format!("plugin '{}' is configured more than once", descriptor.name()),
                });
            }
        }
        Ok(())
    }

    /// Returns the descriptors in file order.
    #[must_use]
    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// Consumes the configuration, returning the descriptors.
    #[must_use]
    pub fn into_plugins(self) -> Vec<PluginDescriptor> {
        self.plugins
    }
}
