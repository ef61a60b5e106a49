//! Plugin process lifecycle and the host half of the handshake.
//!
//! [`ProcessNegotiator`] validates the executable, spawns it with the host's
//! expectations in its environment, reads the single handshake line from
//! stdout within a deadline, and verifies it. On success the caller receives a
//! [`LiveConnection`] owning the child; on any failure the child is killed and
//! reaped before the error is returned.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::handshake::{HandshakeLine, NETWORK_ENV, PROTOCOL_VERSION_ENV};
use crate::manifest::{PluginDescriptor, duration_ms};
use crate::server::cleanup_socket;
use crate::transport::Endpoint;

/// Tracing target for process lifecycle events.
const PROCESS_TARGET: &str = "tether_plugins::process";

/// Longest handshake line accepted before the plugin is rejected.
const MAX_HANDSHAKE_BYTES: u64 = 4096;

/// How long a plugin that closed stdout gets to report its exit status.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Seam over a running plugin process.
///
/// The host manager only needs to identify and stop a plugin; keeping the
/// operations behind a trait lets registry tests run against in-process
/// servers. Handles are shared across the manager's reader threads, hence
/// `Sync`.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// Returns the operating-system process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Stops the process and releases its resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::TerminateFailed`] when the process cannot be
    /// killed or reaped.
    fn terminate(&mut self) -> Result<(), PluginError>;
}

/// Negotiated endpoint together with the process serving it.
#[derive(Debug)]
pub struct LiveConnection {
    name: String,
    endpoint: Endpoint,
    process: Box<dyn ProcessHandle>,
}

impl LiveConnection {
    /// Pairs an endpoint with the process that announced it.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: Endpoint, process: Box<dyn ProcessHandle>) -> Self {
        Self {
            name: name.into(),
            endpoint,
            process,
        }
    }

    /// Returns the plugin's logical name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the endpoint clients connect to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the process id, when known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Stops the plugin process.
    ///
    /// # Errors
    ///
    /// Propagates the failure from [`ProcessHandle::terminate`].
    pub fn terminate(mut self) -> Result<(), PluginError> {
        self.process.terminate()
    }
}

/// Turns a descriptor into a live, handshake-verified connection.
pub trait Negotiator: Send + Sync {
    /// Launches the plugin and completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPath`], [`PluginError::SpawnFailed`],
    /// [`PluginError::StartupFailed`], [`PluginError::Timeout`],
    /// [`PluginError::InvalidHandshake`] or
    /// [`PluginError::HandshakeMismatch`].
    fn negotiate(&self, descriptor: &PluginDescriptor) -> Result<LiveConnection, PluginError>;
}

/// Negotiates by spawning the plugin as a child process.
///
/// # Example
///
/// ```rust,no_run
/// use tether_plugins::HandshakeConfig;
/// use tether_plugins::manifest::PluginDescriptor;
/// use tether_plugins::process::{Negotiator, ProcessNegotiator};
///
/// let descriptor = PluginDescriptor::new(
///     "calc",
///     "/opt/plugins/calculator",
///     HandshakeConfig::new(1, "TETHER_CALC", "calculator"),
/// );
/// let connection = ProcessNegotiator.negotiate(&descriptor)?;
/// println!("calc listens on {}", connection.endpoint());
/// connection.terminate()?;
/// # Ok::<(), tether_plugins::PluginError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessNegotiator;

impl Negotiator for ProcessNegotiator {
    fn negotiate(&self, descriptor: &PluginDescriptor) -> Result<LiveConnection, PluginError> {
        let name = descriptor.name();
        validate_executable(name, descriptor.path())?;

        let mut child = spawn_child(descriptor)?;
        let pid = child.id();
        debug!(
            target: PROCESS_TARGET,
            plugin = name,
            pid,
            executable = %descriptor.path().display(),
            "plugin process spawned"
        );

        let endpoint = match await_handshake(descriptor, &mut child) {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    plugin = name,
                    pid,
                    error = %error,
                    "handshake failed, killing plugin process"
                );
                kill_and_reap(&mut child);
                return Err(error);
            }
        };

        info!(
            target: PROCESS_TARGET,
            plugin = name,
            pid,
            endpoint = %endpoint,
            "plugin handshake complete"
        );
        let process = ChildProcess {
            name: name.to_owned(),
            child: Some(child),
            endpoint: endpoint.clone(),
        };
        Ok(LiveConnection::new(name, endpoint, Box::new(process)))
    }
}

/// Rejects paths that cannot possibly be launched.
fn validate_executable(name: &str, path: &Path) -> Result<(), PluginError> {
    let reject = |reason: &str| PluginError::InvalidPath {
        name: name.to_owned(),
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };
    let metadata = fs::metadata(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => reject("no such file"),
        _ => reject(&err.to_string()),
    })?;
    if metadata.is_dir() {
        return Err(reject("is a directory"));
    }
    if !metadata.is_file() {
        return Err(reject("is not a regular file"));
    }
    if !is_executable(&metadata) {
        return Err(reject("is not executable"));
    }
    Ok(())
}

/// Returns `true` when any execute bit is set.
#[cfg(unix)]
pub(crate) fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) const fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

fn spawn_child(descriptor: &PluginDescriptor) -> Result<Child, PluginError> {
    let handshake = descriptor.handshake();
    let mut command = Command::new(descriptor.path());
    command
        .args(descriptor.args())
        .env(PROTOCOL_VERSION_ENV, handshake.protocol_version().to_string())
        .env(handshake.magic_cookie_key(), handshake.magic_cookie_value())
        .env(NETWORK_ENV, descriptor.network().as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    command.spawn().map_err(|err| PluginError::SpawnFailed {
        name: descriptor.name().to_owned(),
        message: format!("failed to spawn {}: {err}", descriptor.path().display()),
        source: Some(Arc::new(err)),
    })
}

/// Reads and verifies the handshake line.
///
/// A plugin that announced a mismatched descriptor is stopped here so its
/// socket file can be removed.
fn await_handshake(descriptor: &PluginDescriptor, child: &mut Child) -> Result<Endpoint, PluginError> {
    let name = descriptor.name();
    let (stdout, stderr) = take_pipes(name, child)?;
    forward_stream(name, "stderr", stderr);

    let (sender, receiver) = mpsc::channel();
    let plugin = name.to_owned();
    thread::Builder::new()
        .name(format!("tether-{name}-stdout"))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            let first = read_first_line(&mut reader);
            let reached_eof = matches!(first, Ok(None));
            if sender.send(first).is_err() || reached_eof {
                return;
            }
            forward_lines(&plugin, "stdout", reader);
        })
        .map_err(|err| spawn_thread_error(name, err))?;

    let timeout = descriptor.timeouts().handshake();
    let line = match receiver.recv_timeout(timeout) {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) | Err(RecvTimeoutError::Disconnected) => {
            return Err(PluginError::StartupFailed {
                name: name.to_owned(),
                status: describe_exit(child),
            });
        }
        Ok(Err(err)) => return Err(PluginError::transport(name, err)),
        Err(RecvTimeoutError::Timeout) => {
            return Err(PluginError::Timeout {
                name: name.to_owned(),
                operation: String::from("handshake"),
                timeout_ms: duration_ms(timeout),
            });
        }
    };

    debug!(target: PROCESS_TARGET, plugin = name, line = %line, "received handshake line");
    let announced = line
        .parse::<HandshakeLine>()
        .map_err(|err| PluginError::InvalidHandshake {
            name: name.to_owned(),
            line: line.clone(),
            message: err.to_string(),
        })?;

    if let Err(mismatch) = descriptor.handshake().verify(announced.handshake()) {
        kill_and_reap(child);
        cleanup_socket(announced.endpoint());
        return Err(PluginError::HandshakeMismatch {
            name: name.to_owned(),
            field: mismatch.field,
            expected: mismatch.expected,
            actual: mismatch.actual,
        });
    }

    let endpoint = announced.into_endpoint();
    if endpoint.network() != descriptor.network() {
        debug!(
            target: PROCESS_TARGET,
            plugin = name,
            requested = %descriptor.network(),
            announced = %endpoint.network(),
            "plugin chose a different transport"
        );
    }
    Ok(endpoint)
}

fn take_pipes(name: &str, child: &mut Child) -> Result<(ChildStdout, ChildStderr), PluginError> {
    let missing = |stream: &str| PluginError::SpawnFailed {
        name: name.to_owned(),
        message: format!("failed to capture {stream}"),
        source: None,
    };
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok((stdout, stderr))
}

/// Reads one bounded line, stripping the terminator. `None` means EOF.
fn read_first_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    let read = reader.take(MAX_HANDSHAKE_BYTES).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && u64::try_from(read).unwrap_or(u64::MAX) >= MAX_HANDSHAKE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "handshake line exceeds the maximum length",
        ));
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

fn forward_stream(name: &str, stream: &'static str, source: impl Read + Send + 'static) {
    let plugin = name.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("tether-{name}-{stream}"))
        .spawn(move || forward_lines(&plugin, stream, BufReader::new(source)));
    if let Err(error) = spawned {
        warn!(
            target: PROCESS_TARGET,
            plugin = name,
            stream,
            error = %error,
            "failed to start output forwarder"
        );
    }
}

/// Copies plugin output into the host log until the pipe closes.
fn forward_lines(plugin: &str, stream: &str, reader: impl BufRead) {
    for line in reader.lines() {
        match line {
            Ok(text) if text.trim().is_empty() => {}
            Ok(text) => debug!(target: PROCESS_TARGET, plugin, stream, line = %text, "plugin output"),
            Err(_) => break,
        }
    }
}

fn spawn_thread_error(name: &str, err: io::Error) -> PluginError {
    PluginError::SpawnFailed {
        name: name.to_owned(),
        message: format!("failed to start handshake reader: {err}"),
        source: Some(Arc::new(err)),
    }
}

/// Reports why a plugin stopped talking, killing it if it is still alive.
fn describe_exit(child: &mut Child) -> String {
    match child.try_wait() {
        Ok(Some(status)) => return format_status(status),
        Ok(None) => thread::sleep(EXIT_GRACE),
        Err(err) => return format!("status unavailable: {err}"),
    }
    match child.try_wait() {
        Ok(Some(status)) => format_status(status),
        Ok(None) => {
            kill_and_reap(child);
            String::from("closed stdout without exiting")
        }
        Err(err) => format!("status unavailable: {err}"),
    }
}

fn format_status(status: ExitStatus) -> String {
    status
        .code()
        .map_or_else(|| status.to_string(), |code| format!("exit code {code}"))
}

fn kill_and_reap(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: PROCESS_TARGET, error = %error, "kill failed, process likely exited");
    }
    if let Err(error) = child.wait() {
        warn!(target: PROCESS_TARGET, error = %error, "failed to reap plugin process");
    }
}

/// A spawned plugin child process.
#[derive(Debug)]
struct ChildProcess {
    name: String,
    child: Option<Child>,
    endpoint: Endpoint,
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn terminate(&mut self) -> Result<(), PluginError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let result = stop_child(&self.name, &mut child);
        cleanup_socket(&self.endpoint);
        result
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(error) = self.terminate() {
            warn!(
                target: PROCESS_TARGET,
                plugin = self.name.as_str(),
                error = %error,
                "failed to stop plugin process on drop"
            );
        }
    }
}

fn stop_child(name: &str, child: &mut Child) -> Result<(), PluginError> {
    let failed = |message: &str, err: io::Error| PluginError::TerminateFailed {
        name: name.to_owned(),
        message: format!("{message}: {err}"),
        source: Some(Arc::new(err)),
    };
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: PROCESS_TARGET, plugin = name, ?status, "plugin process already exited");
            return Ok(());
        }
        Ok(None) => {}
        Err(err) => {
            warn!(
                target: PROCESS_TARGET,
                plugin = name,
                error = %err,
                "failed to check process status, killing"
            );
        }
    }
    if let Err(err) = child.kill()
        && err.kind() != io::ErrorKind::InvalidInput
    {
        return Err(failed("kill failed", err));
    }
    let status = child.wait().map_err(|err| failed("wait failed", err))?;
    debug!(target: PROCESS_TARGET, plugin = name, ?status, "plugin process terminated");
    Ok(())
}
