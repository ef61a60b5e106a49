//! Host-side RPC client stub.
//!
//! [`RpcClient`] turns `(method, args)` into an `invoke` request, sends it
//! over a [`Channel`], and waits for the response carrying the same id. The
//! client performs no argument checking of its own; the plugin's server stub
//! is authoritative.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::PluginError;
use crate::protocol::{
    CallErrorKind, MALFORMED_REQUEST_ID, Operation, PluginDescription, RpcRequest, RpcResponse,
};
use crate::transport::{Channel, Endpoint, TransportError};
use crate::value::{FromValue, IntoArgs, Value};

/// Tracing target for client-side calls.
const CLIENT_TARGET: &str = "tether_plugins::client";

/// Upper bound on unrelated lines skipped while waiting for a response.
const MAX_RESPONSE_ITERATIONS: usize = 100;

/// Version reported when the plugin does not implement `version`.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Client stub bound to one connection of one plugin.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether_plugins::client::RpcClient;
/// use tether_plugins::transport::{Endpoint, Network};
/// use tether_plugins::Value;
///
/// let endpoint = Endpoint::parse(Network::Tcp, "127.0.0.1:4000").expect("address");
/// let mut client = RpcClient::connect("calc", &endpoint, Duration::from_secs(30))?;
/// let sum = client.call("Add", vec![Value::Int(5), Value::Int(3)])?;
/// assert_eq!(sum, Value::Int(8));
/// # Ok::<(), tether_plugins::PluginError>(())
/// ```
#[derive(Debug)]
pub struct RpcClient {
    plugin: String,
    channel: Channel,
    timeout: Duration,
    next_id: u64,
}

impl RpcClient {
    /// Wraps an established channel.
    #[must_use]
    pub fn new(plugin: impl Into<String>, channel: Channel, timeout: Duration) -> Self {
        Self {
            plugin: plugin.into(),
            channel,
            timeout,
            next_id: 1,
        }
    }

    /// Opens a fresh connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Transport`] when the endpoint is unreachable.
    pub fn connect(plugin: &str, endpoint: &Endpoint, timeout: Duration) -> Result<Self, PluginError> {
        let channel = Channel::connect(endpoint, timeout).map_err(|err| PluginError::Transport {
            name: plugin.to_owned(),
            message: format!("failed to connect to {endpoint}: {err}"),
            source: None,
        })?;
        Ok(Self::new(plugin, channel, timeout))
    }

    /// Returns the plugin name used in errors and logs.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// Invokes `method` with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MethodNotFound`], [`PluginError::BadArguments`]
    /// or [`PluginError::Remote`] as reported by the plugin, and
    /// [`PluginError::Transport`] or [`PluginError::Timeout`] when the
    /// exchange itself fails. Non-finite float arguments fail with
    /// [`PluginError::BadArguments`] before anything is sent.
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value, PluginError> {
        if let Some(position) = args.iter().position(|arg| !arg.is_finite()) {
            return Err(PluginError::BadArguments {
                name: self.plugin.clone(),
                method: method.to_owned(),
                message: format!("argument {} holds a non-finite float", position + 1),
            });
        }
        let id = self.allocate_id();
        self.exchange(RpcRequest::invoke(id, method, args), method)
    }

    /// Invokes `method` with a tuple of typed arguments and decodes the
    /// result, mirroring a statically-typed per-operation stub.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::call`], plus [`PluginError::DeserializeResponse`] when
    /// the result does not convert to `R`.
    pub fn call_typed<A: IntoArgs, R: FromValue>(
        &mut self,
        method: &str,
        args: A,
    ) -> Result<R, PluginError> {
        let value = self.call(method, args.into_args())?;
        R::from_value(value).map_err(|err| PluginError::DeserializeResponse {
            message: format!(
                "plugin '{}' method '{method}' returned an unexpected value: {err}",
                self.plugin
            ),
            source: None,
        })
    }

    /// Fetches help text for `method`, or the plugin summary when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MethodNotFound`] for unknown methods and the
    /// usual exchange errors.
    pub fn help(&mut self, method: Option<&str>) -> Result<String, PluginError> {
        let id = self.allocate_id();
        let (request, label) = method.map_or_else(
            || (RpcRequest::help_summary(id), Operation::Help.as_str()),
            |name| (RpcRequest::help(id, name), name),
        );
        let value = self.exchange(request, label)?;
        Ok(value.to_string())
    }

    /// Fetches the plugin version, or [`UNKNOWN_VERSION`] when the plugin does
    /// not implement the operation.
    ///
    /// # Errors
    ///
    /// Returns exchange errors other than a missing operation.
    pub fn version(&mut self) -> Result<String, PluginError> {
        let id = self.allocate_id();
        match self.exchange(RpcRequest::version(id), Operation::Version.as_str()) {
            Ok(value) => Ok(value.to_string()),
            Err(PluginError::MethodNotFound { .. }) => Ok(UNKNOWN_VERSION.to_owned()),
            Err(other) => Err(other),
        }
    }

    /// Fetches the plugin's self-description.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotIntrospectable`] when the plugin does not
    /// implement `describe` or answers with something other than a
    /// description.
    pub fn describe(&mut self) -> Result<PluginDescription, PluginError> {
        let id = self.allocate_id();
        let value = match self.exchange(RpcRequest::describe(id), Operation::Describe.as_str()) {
            Err(PluginError::MethodNotFound { name, .. }) => {
                return Err(PluginError::NotIntrospectable {
                    name,
                    message: String::from("plugin does not implement describe"),
                });
            }
            other => other?,
        };
        PluginDescription::from_value(&value).map_err(|err| PluginError::NotIntrospectable {
            name: self.plugin.clone(),
            message: format!("expected an object exposing operations, found {}: {err}", value.kind()),
        })
    }

    const fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(1) {
            MALFORMED_REQUEST_ID => 1,
            next => next,
        };
        id
    }

    fn exchange(&mut self, request: RpcRequest, label: &str) -> Result<Value, PluginError> {
        let request_id = request.id();
        let payload = serde_json::to_vec(&request).map_err(PluginError::SerializeRequest)?;
        debug!(
            target: CLIENT_TARGET,
            plugin = self.plugin.as_str(),
            op = request.op(),
            method = label,
            id = request_id,
            "sending request"
        );
        self.channel
            .send(&payload)
            .map_err(|err| self.transport_error(err, label))?;

        let response = self.receive_response(request_id, label)?;
        if let Some(error) = response.error()
            && error.kind() == CallErrorKind::Remote
        {
            debug!(
                target: CLIENT_TARGET,
                plugin = self.plugin.as_str(),
                method = label,
                message = error.message(),
                "plugin reported failure"
            );
        }
        response
            .into_result()
            .map_err(|error| error.into_plugin_error(&self.plugin, label))
    }

    fn receive_response(&mut self, request_id: u64, label: &str) -> Result<RpcResponse, PluginError> {
        let started = Instant::now();
        for _ in 0..MAX_RESPONSE_ITERATIONS {
            if started.elapsed() > self.timeout {
                return Err(self.timeout_error(label));
            }
            let line = self
                .channel
                .receive_required()
                .map_err(|err| self.transport_error(err, label))?;
            let response: RpcResponse =
                serde_json::from_str(&line).map_err(|err| PluginError::DeserializeResponse {
                    message: format!("plugin '{}' produced invalid JSON: {err}", self.plugin),
                    source: Some(err),
                })?;
            if response.id() == request_id || is_rejected_request(&response) {
                return Ok(response);
            }
            warn!(
                target: CLIENT_TARGET,
                plugin = self.plugin.as_str(),
                expected = request_id,
                received = response.id(),
                "skipping response for another request"
            );
        }
        warn!(
            target: CLIENT_TARGET,
            plugin = self.plugin.as_str(),
            request_id,
            max_iterations = MAX_RESPONSE_ITERATIONS,
            "giving up on response after reaching maximum iterations"
        );
        Err(PluginError::Transport {
            name: self.plugin.clone(),
            message: format!("no response for request {request_id} after {MAX_RESPONSE_ITERATIONS} messages"),
            source: None,
        })
    }

    fn timeout_error(&self, label: &str) -> PluginError {
        PluginError::Timeout {
            name: self.plugin.clone(),
            operation: label.to_owned(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn transport_error(&self, err: TransportError, label: &str) -> PluginError {
        if err.is_timeout() {
            return self.timeout_error(label);
        }
        match err {
            TransportError::Io(source) => PluginError::transport(&self.plugin, source),
            other => PluginError::Transport {
                name: self.plugin.clone(),
                message: other.to_string(),
                source: None,
            },
        }
    }
}

/// The server answers an undecodable request line with id `0`. Only one
/// request is outstanding per channel, so that reply belongs to it.
fn is_rejected_request(response: &RpcResponse) -> bool {
    response.id() == MALFORMED_REQUEST_ID
        && response
            .error()
            .is_some_and(|error| error.kind() == CallErrorKind::BadArguments)
}
