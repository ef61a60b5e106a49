//! Host manager owning every loaded plugin.
//!
//! [`PluginManager`] maps logical plugin names to live connections and cached
//! ABIs. Loading negotiates a fresh process and obtains its ABI; invoking
//! dispenses a new client connection and delegates to the client stub;
//! [`PluginManager::unload_all`] terminates every process. Each entry moves
//! through `Unloaded → Loading → Loaded → Unloaded`, and a failed load leaves
//! no trace.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::abi::{AbiGenerator, PluginAbi};
use crate::client::RpcClient;
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::manifest::{PluginDescriptor, RegistryConfig};
use crate::process::{LiveConnection, Negotiator, ProcessNegotiator, is_executable};
use crate::transport::Endpoint;
use crate::value::{FromValue, IntoArgs, Value};

/// Tracing target for host manager operations.
const REGISTRY_TARGET: &str = "tether_plugins::registry";

/// Lifecycle state of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Not known to the manager.
    Unloaded,
    /// Negotiation or ABI retrieval in progress.
    Loading,
    /// Live and callable.
    Loaded,
}

impl PluginState {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a best-effort bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names that reached [`PluginState::Loaded`].
    pub loaded: Vec<String>,
    /// Names that failed, with the reason.
    pub failed: Vec<(String, PluginError)>,
}

impl LoadReport {
    /// Returns `true` when every plugin loaded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Entry {
    descriptor: PluginDescriptor,
    connection: LiveConnection,
}

/// Owns the loaded plugins of one host.
///
/// # Example
///
/// ```rust,no_run
/// use tether_plugins::{HandshakeConfig, PluginManager, Value};
/// use tether_plugins::manifest::PluginDescriptor;
///
/// let manager = PluginManager::new();
/// manager.load(PluginDescriptor::new(
///     "calc",
///     "./bin/tether-plugin-calculator",
///     HandshakeConfig::for_plugin("calculator"),
/// ))?;
/// let sum = manager.invoke("calc", "Add", vec![Value::Int(5), Value::Int(3)])?;
/// assert_eq!(sum, Value::Int(8));
/// manager.unload_all();
/// # Ok::<(), tether_plugins::PluginError>(())
/// ```
pub struct PluginManager<N: Negotiator = ProcessNegotiator> {
    negotiator: N,
    generator: AbiGenerator,
    connections: RwLock<HashMap<String, Entry>>,
    abis: RwLock<HashMap<String, PluginAbi>>,
    loading: Mutex<HashSet<String>>,
}

impl PluginManager<ProcessNegotiator> {
    /// Creates a manager that spawns plugins as child processes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_negotiator(ProcessNegotiator)
    }
}

impl Default for PluginManager<ProcessNegotiator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Negotiator> PluginManager<N> {
    /// Creates a manager using a custom negotiator.
    #[must_use]
    pub fn with_negotiator(negotiator: N) -> Self {
        Self {
            negotiator,
            generator: AbiGenerator::new(),
            connections: RwLock::new(HashMap::new()),
            abis: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the ABI generator so callers can register type overrides
    /// before loading.
    #[must_use]
    pub const fn generator(&self) -> &AbiGenerator {
        &self.generator
    }

    /// Launches a plugin, verifies its handshake, and caches its ABI.
    ///
    /// The ABI comes from the descriptor when one is supplied, otherwise
    /// from the plugin's `describe` operation. If that fails the freshly
    /// spawned process is terminated. No retry is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyLoaded`] for a duplicate name,
    /// [`PluginError::Config`] for an invalid descriptor, and any
    /// negotiation or ABI retrieval failure.
    pub fn load(&self, descriptor: PluginDescriptor) -> Result<(), PluginError> {
        descriptor.validate()?;
        let name = descriptor.name().to_owned();
        let _reservation = self.reserve(&name)?;
        debug!(target: REGISTRY_TARGET, plugin = name.as_str(), "loading plugin");

        let connection = self.negotiator.negotiate(&descriptor)?;
        let resolved = descriptor.abi().cloned().map_or_else(
            || self.fetch_abi(&name, connection.endpoint(), descriptor.timeouts().call()),
            Ok,
        );
        let abi = match resolved {
            Ok(abi) => abi,
            Err(error) => {
                terminate_logged(connection);
                return Err(error);
            }
        };

        info!(
            target: REGISTRY_TARGET,
            plugin = name.as_str(),
            pid = connection.pid(),
            endpoint = %connection.endpoint(),
            methods = abi.methods.len(),
            "plugin loaded"
        );
        self.abis_write().insert(name.clone(), abi);
        self.connections_write().insert(
            name,
            Entry {
                descriptor,
                connection,
            },
        );
        Ok(())
    }

    /// Loads every descriptor in a configuration, continuing past failures.
    #[must_use = "inspect the report for per-plugin failures"]
    pub fn load_config(&self, config: RegistryConfig) -> LoadReport {
        self.load_all(config.into_plugins())
    }

    /// Loads every executable in `dir`, keyed by its file stem.
    ///
    /// All plugins share `handshake`. Hidden files and non-executables are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] when the directory cannot be read.
    pub fn load_directory(
        &self,
        dir: &Path,
        handshake: &HandshakeConfig,
    ) -> Result<LoadReport, PluginError> {
        let entries = fs::read_dir(dir).map_err(|err| PluginError::Config {
            message: format!("failed to read plugin directory {}: {err}", dir.display()),
        })?;
        let mut descriptors: Vec<PluginDescriptor> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_candidate(path))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_owned();
                Some(PluginDescriptor::new(stem, path, handshake.clone()))
            })
            .collect();
        descriptors.sort_by(|a, b| a.name().cmp(b.name()));
        debug!(
            target: REGISTRY_TARGET,
            dir = %dir.display(),
            candidates = descriptors.len(),
            "loading plugin directory"
        );
        Ok(self.load_all(descriptors))
    }

    /// Invokes `method` on a loaded plugin over a fresh connection.
    ///
    /// No lock is held while the call is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] without spawning anything when the
    /// name is unknown, and any client stub failure otherwise.
    pub fn invoke(&self, name: &str, method: &str, args: Vec<Value>) -> Result<Value, PluginError> {
        self.client(name)?.call(method, args)
    }

    /// Typed variant of [`PluginManager::invoke`].
    ///
    /// # Errors
    ///
    /// As [`PluginManager::invoke`], plus
    /// [`PluginError::DeserializeResponse`] when the result does not convert.
    pub fn invoke_typed<A: IntoArgs, R: FromValue>(
        &self,
        name: &str,
        method: &str,
        args: A,
    ) -> Result<R, PluginError> {
        self.client(name)?.call_typed(method, args)
    }

    /// Returns the plugin's ABI, fetching and caching it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] when the ABI is not cached and the
    /// plugin is not loaded, or the fetch failure.
    pub fn describe(&self, name: &str) -> Result<PluginAbi, PluginError> {
        if let Some(abi) = self.abis_read().get(name) {
            return Ok(abi.clone());
        }
        let (endpoint, timeout) = self.route(name)?;
        let abi = self.fetch_abi(name, &endpoint, timeout)?;
        self.abis_write().insert(name.to_owned(), abi.clone());
        Ok(abi)
    }

    /// Drops a cached ABI so the next [`PluginManager::describe`] refetches
    /// it.
    pub fn forget_abi(&self, name: &str) {
        self.abis_write().remove(name);
    }

    /// Returns the descriptor a loaded plugin was started from.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<PluginDescriptor> {
        self.connections_read()
            .get(name)
            .map(|entry| entry.descriptor.clone())
    }

    /// Fetches help text for a method, or the plugin summary when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] or the client stub failure.
    pub fn help(&self, name: &str, method: Option<&str>) -> Result<String, PluginError> {
        self.client(name)?.help(method)
    }

    /// Fetches the plugin's version string.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] or the client stub failure.
    pub fn version(&self, name: &str) -> Result<String, PluginError> {
        self.client(name)?.version()
    }

    /// Terminates every loaded plugin and empties the registry.
    ///
    /// Termination failures are logged and never stop the fan-out. Calling
    /// this again is a no-op.
    pub fn unload_all(&self) {
        let drained: Vec<(String, Entry)> = self.connections_write().drain().collect();
        self.abis_write().clear();
        let count = drained.len();
        for (name, entry) in drained {
            debug!(target: REGISTRY_TARGET, plugin = name.as_str(), "unloading plugin");
            terminate_logged(entry.connection);
        }
        if count > 0 {
            info!(target: REGISTRY_TARGET, count, "unloaded all plugins");
        }
    }

    /// Reports an entry's lifecycle state.
    #[must_use]
    pub fn state(&self, name: &str) -> PluginState {
        if self.connections_read().contains_key(name) {
            PluginState::Loaded
        } else if self.loading_set().contains(name) {
            PluginState::Loading
        } else {
            PluginState::Unloaded
        }
    }

    /// Returns the names of loaded plugins in sorted order.
    #[must_use]
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections_read().keys().cloned().collect();
        names.sort();
        names
    }

    fn load_all(&self, descriptors: Vec<PluginDescriptor>) -> LoadReport {
        let mut report = LoadReport::default();
        for descriptor in descriptors {
            let name = descriptor.name().to_owned();
            match self.load(descriptor) {
                Ok(()) => report.loaded.push(name),
                Err(error) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        plugin = name.as_str(),
                        error = %error,
                        "failed to load plugin"
                    );
                    report.failed.push((name, error));
                }
            }
        }
        report
    }

    fn client(&self, name: &str) -> Result<RpcClient, PluginError> {
        let (endpoint, timeout) = self.route(name)?;
        RpcClient::connect(name, &endpoint, timeout)
    }

    /// Copies what a caller needs to reach a plugin, releasing the lock
    /// before any I/O happens.
    fn route(&self, name: &str) -> Result<(Endpoint, Duration), PluginError> {
        self.connections_read()
            .get(name)
            .map(|entry| {
                (
                    entry.connection.endpoint().clone(),
                    entry.descriptor.timeouts().call(),
                )
            })
            .ok_or_else(|| PluginError::NotLoaded {
                name: name.to_owned(),
            })
    }

    fn fetch_abi(
        &self,
        name: &str,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<PluginAbi, PluginError> {
        let description = RpcClient::connect(name, endpoint, timeout)?.describe()?;
        self.generator
            .generate_from_instance(name, &description.version, &description.operations)
    }

    fn reserve(&self, name: &str) -> Result<Reservation<'_>, PluginError> {
        let mut loading = self.loading_set();
        if loading.contains(name) || self.connections_read().contains_key(name) {
            return Err(PluginError::AlreadyLoaded {
                name: name.to_owned(),
            });
        }
        loading.insert(name.to_owned());
        Ok(Reservation {
            loading: &self.loading,
            name: name.to_owned(),
        })
    }

    fn loading_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.loading
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn connections_read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.connections
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn connections_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.connections
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn abis_read(&self) -> RwLockReadGuard<'_, HashMap<String, PluginAbi>> {
        self.abis.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn abis_write(&self) -> RwLockWriteGuard<'_, HashMap<String, PluginAbi>> {
        self.abis.write().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<N: Negotiator> fmt::Debug for PluginManager<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("loaded", &self.loaded_names())
            .finish_non_exhaustive()
    }
}

impl<N: Negotiator> Drop for PluginManager<N> {
    fn drop(&mut self) {
        self.unload_all();
    }
}

/// Marks a name as loading until dropped.
struct Reservation<'a> {
    loading: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.loading
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(&self.name);
    }
}

fn terminate_logged(connection: LiveConnection) {
    let name = connection.name().to_owned();
    if let Err(error) = connection.terminate() {
        warn!(
            target: REGISTRY_TARGET,
            plugin = name.as_str(),
            error = %error,
            "failed to terminate plugin"
        );
    }
}

/// Accepts visible regular files that look executable.
fn is_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|file| file.to_str())
        .is_none_or(|file| file.starts_with('.'));
    if hidden {
        return false;
    }
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file() && is_executable(&metadata))
}

#[cfg(test)]
mod tests;
