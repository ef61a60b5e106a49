//! Plugin-side RPC dispatcher and serve loop.
//!
//! A plugin binary builds a [`MethodTable`] from ordinary Rust functions and
//! hands it to [`serve`]. The table answers the four server operations:
//!
//! - `invoke` calls a registered method with positional arguments.
//! - `help` returns a method's help text, or a summary of every method.
//! - `version` returns the plugin version.
//! - `describe` returns the operation shapes used for ABI generation.
//!
//! Unknown operations and methods yield `method_not_found`; arity and shape
//! mismatches yield `bad_arguments`; failures and panics inside a method yield
//! `remote`. None of these close the connection.

mod errors;
mod handler;
mod listener;
mod serve;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::abi::{ImplementationShape, Introspect, OperationShape};
use crate::protocol::{
    CallError, MALFORMED_REQUEST_ID, Operation, PluginDescription, RpcRequest, RpcResponse,
};
use crate::transport::{Channel, TransportError};
use crate::value::Value;

pub use self::errors::ServeError;
pub use self::handler::{FallibleMethod, InfallibleMethod};
pub use self::listener::{PluginListener, ServerHandle};
pub(crate) use self::listener::cleanup_socket;
pub use self::serve::{HostEnvironment, run_plugin, serve, start};

/// Tracing target for server-side dispatch.
pub(crate) const SERVER_TARGET: &str = "tether_plugins::server";

type BoxedHandler = Box<dyn Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync>;

struct RegisteredMethod {
    shape: OperationShape,
    help: String,
    handler: BoxedHandler,
}

/// Registry of a plugin's exported methods.
///
/// # Example
///
/// ```
/// use tether_plugins::server::MethodTable;
/// use tether_plugins::Value;
///
/// fn add(a: i64, b: i64) -> i64 {
///     a + b
/// }
///
/// let table = MethodTable::new("calc", "1.0.0").infallible("Add", "Adds two integers.", add);
/// let sum = table.call("Add", vec![Value::Int(5), Value::Int(3)]).expect("call succeeds");
/// assert_eq!(sum, Value::Int(8));
/// ```
pub struct MethodTable {
    name: String,
    version: String,
    methods: BTreeMap<String, RegisteredMethod>,
}

impl MethodTable {
    /// Creates an empty table for the named plugin.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Registers a method whose `Err` value becomes a `remote` failure.
    #[must_use]
    pub fn fallible<Args, F>(self, name: &str, help: &str, method: F) -> Self
    where
        F: FallibleMethod<Args>,
    {
        let shape = OperationShape::new(name, F::params(), F::returns(), true);
        self.register(shape, help, Box::new(move |args| method.call(args)))
    }

    /// Registers a method that always produces a value.
    #[must_use]
    pub fn infallible<Args, F>(self, name: &str, help: &str, method: F) -> Self
    where
        F: InfallibleMethod<Args>,
    {
        let shape = OperationShape::new(name, F::params(), F::returns(), false);
        self.register(shape, help, Box::new(move |args| method.call(args)))
    }

    fn register(mut self, shape: OperationShape, help: &str, handler: BoxedHandler) -> Self {
        let method = RegisteredMethod {
            shape,
            help: help.to_owned(),
            handler,
        };
        self.methods.insert(method.shape.name.clone(), method);
        self
    }

    /// Returns the plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the plugin version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the registered method names in sorted order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Returns the shape of every registered method.
    #[must_use]
    pub fn operations(&self) -> Vec<OperationShape> {
        self.methods
            .values()
            .map(|method| method.shape.clone())
            .collect()
    }

    /// Returns the self-description served by the `describe` operation.
    #[must_use]
    pub fn description(&self) -> PluginDescription {
        PluginDescription {
            name: self.name.clone(),
            version: self.version.clone(),
            operations: self.operations(),
        }
    }

    /// Returns the help text for one method.
    #[must_use]
    pub fn help(&self, method: &str) -> Option<&str> {
        self.methods.get(method).map(|entry| entry.help.as_str())
    }

    /// Renders a one-line-per-method summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut text = format!("{} {}\n", self.name, self.version);
        for (name, method) in &self.methods {
            let first_line = method.help.lines().next().unwrap_or_default();
            // Writing to a String cannot fail.
            writeln!(text, "  {name}: {first_line}").ok();
        }
        text
    }

    /// Calls a method with positional arguments.
    ///
    /// Panics inside the method are caught and reported as `remote`.
    ///
    /// # Errors
    ///
    /// Returns `method_not_found` for unknown methods, `bad_arguments` for
    /// arity or shape mismatches, and `remote` for method failures.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| CallError::method_not_found(method))?;
        panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(args))).unwrap_or_else(
            |payload| {
                let message = panic_message(payload.as_ref());
                warn!(
                    target: SERVER_TARGET,
                    plugin = self.name.as_str(),
                    method,
                    panic = message.as_str(),
                    "plugin method panicked"
                );
                Err(CallError::remote(format!("method panicked: {message}")))
            },
        )
    }

    /// Answers one request.
    #[must_use]
    pub fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id();
        debug!(
            target: SERVER_TARGET,
            plugin = self.name.as_str(),
            id,
            op = request.op(),
            method = request.method().unwrap_or_default(),
            "handling request"
        );
        match self.dispatch(request) {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        }
    }

    fn dispatch(&self, request: RpcRequest) -> Result<Value, CallError> {
        match request.operation()? {
            Operation::Invoke => {
                let method = request
                    .method()
                    .ok_or_else(|| CallError::bad_arguments("invoke requires a method name"))?
                    .to_owned();
                self.call(&method, request.into_args())
            }
            Operation::Help => request.method().map_or_else(
                || Ok(Value::String(self.summary())),
                |method| {
                    self.help(method)
                        .map(|text| Value::String(text.to_owned()))
                        .ok_or_else(|| CallError::method_not_found(method))
                },
            ),
            Operation::Version => Ok(Value::String(self.version.clone())),
            Operation::Describe => self
                .description()
                .to_value()
                .map_err(|err| CallError::remote(format!("failed to encode description: {err}"))),
        }
    }

    /// Answers one raw request line.
    ///
    /// A line that is not a valid request envelope yields a `bad_arguments`
    /// response with id `0`.
    #[must_use]
    pub fn handle_line(&self, line: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle(request),
            Err(err) => {
                warn!(
                    target: SERVER_TARGET,
                    plugin = self.name.as_str(),
                    error = %err,
                    "malformed request line"
                );
                RpcResponse::failure(
                    MALFORMED_REQUEST_ID,
                    CallError::bad_arguments(format!("malformed request: {err}")),
                )
            }
        }
    }

    /// Serves requests from one connection until the peer closes it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when reading or writing the channel fails.
    pub fn serve_channel(&self, channel: &mut Channel) -> Result<(), TransportError> {
        while let Some(line) = channel.receive()? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line);
            channel.send(&self.encode_response(&response)?)?;
        }
        Ok(())
    }

    /// Encodes a response, replacing an unencodable result with a `remote`
    /// failure so the connection keeps serving.
    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(response).or_else(|err| {
            warn!(
                target: SERVER_TARGET,
                plugin = self.name.as_str(),
                id = response.id(),
                error = %err,
                "result cannot be encoded"
            );
            let fallback = RpcResponse::failure(
                response.id(),
                CallError::remote(format!("result cannot be encoded: {err}")),
            );
            serde_json::to_vec(&fallback).map_err(|fallback_err| {
                TransportError::Io(std::io::Error::other(fallback_err))
            })
        })
    }
}

impl Introspect for MethodTable {
    fn implementation_shape(&self) -> ImplementationShape {
        ImplementationShape::Object(self.operations())
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic payload"))
}
