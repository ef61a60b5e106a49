//! RPC envelopes exchanged between the host and a running plugin.
//!
//! Each message is a single JSONL line. The host sends an [`RpcRequest`]
//! naming an operation (`invoke`, `help`, `version`, or `describe`) and the
//! plugin answers with an [`RpcResponse`] carrying the same `id` and either a
//! result [`Value`] or a structured [`CallError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abi::OperationShape;
use crate::error::PluginError;
use crate::value::Value;

/// Id the server uses when answering a line it could not decode.
pub const MALFORMED_REQUEST_ID: u64 = 0;

/// Operations a plugin server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Call an exported method.
    Invoke,
    /// Fetch a method's help text.
    Help,
    /// Fetch the plugin's version string.
    Version,
    /// Enumerate the plugin's operation shapes.
    Describe,
}

impl Operation {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Help => "help",
            Self::Version => "version",
            Self::Describe => "describe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CallError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "invoke" => Ok(Self::Invoke),
            "help" => Ok(Self::Help),
            "version" => Ok(Self::Version),
            "describe" => Ok(Self::Describe),
            other => Err(CallError::method_not_found(other)),
        }
    }
}

/// Request envelope sent by the host.
///
/// # Example
///
/// ```
/// use tether_plugins::protocol::RpcRequest;
/// use tether_plugins::Value;
///
/// let request = RpcRequest::invoke(1, "Add", vec![Value::Int(5), Value::Int(3)]);
/// let json = serde_json::to_string(&request).expect("serialise");
/// assert!(json.starts_with(r#"{"id":1,"op":"invoke","method":"Add""#));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    id: u64,
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
}

impl RpcRequest {
    fn new(id: u64, op: Operation, method: Option<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            op: op.as_str().to_owned(),
            method,
            args,
        }
    }

    /// Builds an `invoke` request.
    #[must_use]
    pub fn invoke(id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(id, Operation::Invoke, Some(method.into()), args)
    }

    /// Builds a `help` request for one method.
    #[must_use]
    pub fn help(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, Operation::Help, Some(method.into()), Vec::new())
    }

    /// Builds a `help` request for the plugin-wide summary.
    #[must_use]
    pub fn help_summary(id: u64) -> Self {
        Self::new(id, Operation::Help, None, Vec::new())
    }

    /// Builds a `version` request.
    #[must_use]
    pub fn version(id: u64) -> Self {
        Self::new(id, Operation::Version, None, Vec::new())
    }

    /// Builds a `describe` request.
    #[must_use]
    pub fn describe(id: u64) -> Self {
        Self::new(id, Operation::Describe, None, Vec::new())
    }

    /// Returns the correlation id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the raw operation name.
    #[must_use]
    pub const fn op(&self) -> &str {
        self.op.as_str()
    }

    /// Parses the operation name.
    ///
    /// # Errors
    ///
    /// Returns a `method_not_found` [`CallError`] for unknown operations.
    pub fn operation(&self) -> Result<Operation, CallError> {
        self.op.parse()
    }

    /// Returns the target method, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Consumes the request, returning the positional arguments.
    #[must_use]
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }
}

/// Response envelope sent by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<CallError>,
}

impl RpcResponse {
    /// Builds a successful response.
    #[must_use]
    pub const fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failed response; the result is left unset.
    #[must_use]
    pub const fn failure(id: u64, error: CallError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns the correlation id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the structured error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&CallError> {
        self.error.as_ref()
    }

    /// Converts the envelope into a result.
    ///
    /// A response with neither field set yields [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns the carried [`CallError`] when present.
    pub fn into_result(self) -> Result<Value, CallError> {
        let result = self.result;
        self.error
            .map_or_else(|| Ok(result.unwrap_or(Value::Null)), Err)
    }
}

/// Category of a plugin-side call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    /// No such method or operation.
    MethodNotFound,
    /// Arity or argument shape mismatch.
    BadArguments,
    /// The implementation reported a failure.
    Remote,
}

impl CallErrorKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MethodNotFound => "method_not_found",
            Self::BadArguments => "bad_arguments",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure reported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    kind: CallErrorKind,
    message: String,
}

impl CallError {
    /// Creates a call error.
    #[must_use]
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Reports an unknown method or operation.
    #[must_use]
    pub fn method_not_found(name: &str) -> Self {
        Self::new(
            CallErrorKind::MethodNotFound,
            format!("unknown method '{name}'"),
        )
    }

    /// Reports an arity or shape mismatch.
    #[must_use]
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::BadArguments, message)
    }

    /// Reports an implementation failure.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Remote, message)
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> CallErrorKind {
        self.kind
    }

    /// Returns the failure message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Lifts the failure into a host-side [`PluginError`].
    #[must_use]
    pub fn into_plugin_error(self, plugin: &str, method: &str) -> PluginError {
        let name = plugin.to_owned();
        let method = method.to_owned();
        match self.kind {
            CallErrorKind::MethodNotFound => PluginError::MethodNotFound { name, method },
            CallErrorKind::BadArguments => PluginError::BadArguments {
                name,
                method,
                message: self.message,
            },
            CallErrorKind::Remote => PluginError::Remote {
                name,
                method,
                message: self.message,
            },
        }
    }
}

/// Self-description returned by the `describe` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescription {
    /// Name the plugin was compiled with.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Exported operations.
    pub operations: Vec<OperationShape>,
}

impl PluginDescription {
    /// Encodes the description as a result [`Value`].
    ///
    /// # Errors
    ///
    /// Returns the serialisation failure.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self).map(Value::from_json)
    }

    /// Decodes a description from a result [`Value`].
    ///
    /// # Errors
    ///
    /// Returns the deserialisation failure when the value has the wrong
    /// structure.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.to_json())
    }
}
