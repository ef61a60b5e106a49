//! Handshake descriptor and the startup line wire format.
//!
//! Before any application call is trusted, the host and the plugin agree on a
//! protocol version and a shared secret (the "magic cookie"). The host passes
//! its expectations to the child through environment variables; the plugin
//! answers with a single pipe-delimited line on stdout:
//!
//! ```text
//! <protocol_version>|<network>|<address>|<magic_cookie_key>|<magic_cookie_value>
//! ```
//!
//! The line is the only output the plugin may write before serving. Fields
//! are not escaped, so the cookie key and value may not contain `|`, `\n`,
//! or `\r`. The key doubles as an environment variable name and must also be
//! non-empty and free of `=` and NUL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::transport::{Endpoint, Network};

/// Environment variable carrying the host's protocol version.
///
/// Its absence tells a plugin binary it was launched directly rather than by
/// a host.
pub const PROTOCOL_VERSION_ENV: &str = "TETHER_PROTOCOL_VERSION";

/// Environment variable selecting the transport the plugin should listen on.
pub const NETWORK_ENV: &str = "TETHER_PLUGIN_NETWORK";

/// Separator between handshake line fields.
const FIELD_SEPARATOR: char = '|';

/// Characters that would split or terminate the handshake line.
const LINE_BREAKING: [char; 3] = [FIELD_SEPARATOR, '\n', '\r'];

/// Characters an environment variable name cannot hold.
const ENV_NAME_FORBIDDEN: [char; 2] = ['=', '\0'];

/// Protocol version, secret key name, and expected secret value.
///
/// A connection is valid only when both sides present identical values for
/// all three fields.
///
/// # Example
///
/// ```
/// use tether_plugins::HandshakeConfig;
///
/// let handshake = HandshakeConfig::new(1, "TETHER_CALC", "calculator");
/// assert_eq!(handshake.protocol_version(), 1);
/// assert_eq!(handshake.magic_cookie_key(), "TETHER_CALC");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(alias = "ProtocolVersion")]
    protocol_version: u32,
    #[serde(alias = "MagicCookieKey")]
    magic_cookie_key: String,
    #[serde(alias = "MagicCookieValue")]
    magic_cookie_value: String,
}

impl HandshakeConfig {
    /// Creates a handshake descriptor.
    #[must_use]
    pub fn new(
        protocol_version: u32,
        magic_cookie_key: impl Into<String>,
        magic_cookie_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            magic_cookie_key: magic_cookie_key.into(),
            magic_cookie_value: magic_cookie_value.into(),
        }
    }

    /// Builds the conventional per-plugin descriptor used by the reference
    /// plugins: version 1, key `TETHER_PLUGIN_<NAME>`, value `<name>`.
    #[must_use]
    pub fn for_plugin(plugin_name: &str) -> Self {
        Self::new(
            1,
            format!("TETHER_PLUGIN_{}", plugin_name.to_ascii_uppercase()),
            plugin_name,
        )
    }

    /// Returns the protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns the secret key name.
    #[must_use]
    pub const fn magic_cookie_key(&self) -> &str {
        self.magic_cookie_key.as_str()
    }

    /// Returns the expected secret value.
    #[must_use]
    pub const fn magic_cookie_value(&self) -> &str {
        self.magic_cookie_value.as_str()
    }

    /// Checks that the cookie fields survive the handshake line and the
    /// child's environment unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeConfigError`] for an empty key, a key holding `=`
    /// or NUL, or a key or value holding `|` or a line break.
    pub fn validate(&self) -> Result<(), HandshakeConfigError> {
        if self.magic_cookie_key.is_empty() {
            return Err(HandshakeConfigError::EmptyKey);
        }
        if let Some(character) = self.magic_cookie_key.chars().find(|candidate| {
            LINE_BREAKING.contains(candidate) || ENV_NAME_FORBIDDEN.contains(candidate)
        }) {
            return Err(HandshakeConfigError::ForbiddenCharacter {
                field: HandshakeField::MagicCookieKey,
                character,
            });
        }
        if let Some(character) = self
            .magic_cookie_value
            .chars()
            .find(|candidate| LINE_BREAKING.contains(candidate))
        {
            return Err(HandshakeConfigError::ForbiddenCharacter {
                field: HandshakeField::MagicCookieValue,
                character,
            });
        }
        Ok(())
    }

    /// Checks every field; a single mismatch is fatal.
    ///
    /// # Errors
    ///
    /// Returns the first [`HandshakeMismatch`] found, in the order version,
    /// key, value.
    pub fn verify(&self, reported: &Self) -> Result<(), HandshakeMismatch> {
        if self.protocol_version != reported.protocol_version {
            return Err(HandshakeMismatch {
                field: HandshakeField::ProtocolVersion,
                expected: self.protocol_version.to_string(),
                actual: reported.protocol_version.to_string(),
            });
        }
        if self.magic_cookie_key != reported.magic_cookie_key {
            return Err(HandshakeMismatch {
                field: HandshakeField::MagicCookieKey,
                expected: self.magic_cookie_key.clone(),
                actual: reported.magic_cookie_key.clone(),
            });
        }
        if self.magic_cookie_value != reported.magic_cookie_value {
            return Err(HandshakeMismatch {
                field: HandshakeField::MagicCookieValue,
                expected: self.magic_cookie_value.clone(),
                actual: reported.magic_cookie_value.clone(),
            });
        }
        Ok(())
    }
}

/// Identifies which handshake field disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeField {
    /// The protocol version number.
    ProtocolVersion,
    /// The name of the secret key.
    MagicCookieKey,
    /// The secret value.
    MagicCookieValue,
}

impl HandshakeField {
    /// Returns a human-readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolVersion => "protocol version",
            Self::MagicCookieKey => "magic cookie key",
            Self::MagicCookieValue => "magic cookie value",
        }
    }
}

impl fmt::Display for HandshakeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cookie fields that cannot be carried by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeConfigError {
    /// The key would name no environment variable.
    #[error("magic cookie key must not be empty")]
    EmptyKey,
    /// A field holds a character the handshake cannot carry.
    #[error("{field} must not contain {character:?}")]
    ForbiddenCharacter {
        /// Field holding the character.
        field: HandshakeField,
        /// Offending character.
        character: char,
    },
}

/// A single field disagreement found by [`HandshakeConfig::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMismatch {
    /// Field that differed.
    pub field: HandshakeField,
    /// Value the verifier expected.
    pub expected: String,
    /// Value the peer reported.
    pub actual: String,
}

/// Parsed form of the plugin's startup line.
///
/// # Example
///
/// ```
/// use tether_plugins::handshake::HandshakeLine;
///
/// let line: HandshakeLine = "1|tcp|127.0.0.1:4000|TETHER_CALC|calculator"
///     .parse()
///     .expect("valid line");
/// assert_eq!(line.handshake().protocol_version(), 1);
/// assert_eq!(line.to_string(), "1|tcp|127.0.0.1:4000|TETHER_CALC|calculator");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    handshake: HandshakeConfig,
    endpoint: Endpoint,
}

impl HandshakeLine {
    /// Creates a line announcing `endpoint` under the given descriptor.
    #[must_use]
    pub const fn new(handshake: HandshakeConfig, endpoint: Endpoint) -> Self {
        Self {
            handshake,
            endpoint,
        }
    }

    /// Returns the descriptor the plugin reported.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeConfig {
        &self.handshake
    }

    /// Returns the announced transport endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Consumes the line, returning the announced endpoint.
    #[must_use]
    pub fn into_endpoint(self) -> Endpoint {
        self.endpoint
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.handshake.protocol_version,
            self.endpoint.network(),
            self.endpoint.address(),
            self.handshake.magic_cookie_key,
            self.handshake.magic_cookie_value,
        )
    }
}

/// Reasons a startup line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeLineError {
    /// The line did not contain exactly five fields.
    #[error("expected five '|'-separated fields, found {found}")]
    FieldCount {
        /// Number of fields found.
        found: usize,
    },
    /// The protocol version was not an unsigned integer.
    #[error("protocol version '{value}' is not an unsigned integer")]
    Version {
        /// Raw version text.
        value: String,
    },
    /// The network name was not recognised.
    #[error("unsupported network '{value}'")]
    Network {
        /// Raw network text.
        value: String,
    },
    /// The address could not be parsed for the network.
    #[error("invalid {network} address '{value}'")]
    Address {
        /// Network the address was parsed for.
        network: Network,
        /// Raw address text.
        value: String,
    },
}

impl FromStr for HandshakeLine {
    type Err = HandshakeLineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line
            .trim_end_matches(['\r', '\n'])
            .split(FIELD_SEPARATOR)
            .collect();
        let [version, network, address, key, value] = fields.as_slice() else {
            return Err(HandshakeLineError::FieldCount {
                found: fields.len(),
            });
        };

        let protocol_version = version
            .trim()
            .parse::<u32>()
            .map_err(|_| HandshakeLineError::Version {
                value: (*version).to_owned(),
            })?;
        let network = network
            .parse::<Network>()
            .map_err(|_| HandshakeLineError::Network {
                value: (*network).to_owned(),
            })?;
        let endpoint =
            Endpoint::parse(network, address).ok_or_else(|| HandshakeLineError::Address {
                network,
                value: (*address).to_owned(),
            })?;

        Ok(Self::new(
            HandshakeConfig::new(protocol_version, *key, *value),
            endpoint,
        ))
    }
}
