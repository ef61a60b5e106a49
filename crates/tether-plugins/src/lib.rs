//! Out-of-process plugin host runtime.
//!
//! The `tether-plugins` crate lets a host program run independently compiled
//! plugin binaries as child processes and call their methods by name. It
//! covers both halves of the contract:
//!
//! - **Host side.** A [`PluginManager`] validates each
//!   [`manifest::PluginDescriptor`], spawns the executable, verifies the
//!   handshake, caches the plugin's [`abi::PluginAbi`], and dispatches
//!   [`PluginManager::invoke`] calls through the [`client::RpcClient`] stub.
//! - **Plugin side.** A plugin binary fills a [`server::MethodTable`] with
//!   ordinary Rust functions and hands it to [`server::serve`], which prints
//!   the handshake line and answers requests.
//!
//! # Protocol
//!
//! The host exports `TETHER_PROTOCOL_VERSION`, the plugin's secret cookie and
//! `TETHER_PLUGIN_NETWORK` to the child. The plugin answers with a single
//! line on stdout:
//!
//! ```text
//! <protocol_version>|<network>|<address>|<magic_cookie_key>|<magic_cookie_value>
//! ```
//!
//! Afterwards the host opens one socket connection per call and exchanges
//! JSONL [`protocol::RpcRequest`] and [`protocol::RpcResponse`] envelopes
//! carrying tagged [`Value`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_plugins::{HandshakeConfig, PluginManager, Value};
//! use tether_plugins::manifest::PluginDescriptor;
//!
//! let manager = PluginManager::new();
//! manager.load(PluginDescriptor::new(
//!     "calc",
//!     "./bin/tether-plugin-calculator",
//!     HandshakeConfig::for_plugin("calculator"),
//! ))?;
//!
//! let abi = manager.describe("calc")?;
//! assert!(abi.method("Add").is_some());
//!
//! let sum = manager.invoke("calc", "Add", vec![Value::Int(5), Value::Int(3)])?;
//! assert_eq!(sum, Value::Int(8));
//!
//! manager.unload_all();
//! # Ok::<(), tether_plugins::PluginError>(())
//! ```

pub mod abi;
pub mod client;
pub mod error;
pub mod handshake;
pub mod manifest;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;
pub mod value;

#[cfg(test)]
mod tests;

pub use self::abi::{AbiGenerator, MethodSpec, PluginAbi};
pub use self::error::PluginError;
pub use self::handshake::HandshakeConfig;
pub use self::manifest::{PluginDescriptor, RegistryConfig};
pub use self::registry::{LoadReport, PluginManager, PluginState};
pub use self::value::{FromValue, IntoArgs, IntoValue, Value};
