//! In-process test doubles for hosts built on this crate.
//!
//! [`InProcessNegotiator`] serves the [`calculator`] method table on a
//! loopback listener instead of spawning a child process, so host-side code
//! can be exercised without building plugin binaries.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::manifest::PluginDescriptor;
use crate::process::{LiveConnection, Negotiator, ProcessHandle};
use crate::server::{MethodTable, PluginListener, ServeError, ServerHandle};

fn divide(a: i64, b: i64) -> Result<i64, String> {
    a.checked_div(b)
        .ok_or_else(|| String::from("division by zero"))
}

/// A two-method calculator: `Add` and a fallible `Divide`.
#[must_use]
pub fn calculator() -> MethodTable {
    MethodTable::new("calculator", "1.0.0")
        .infallible("Add", "Adds two integers.", |a: i64, b: i64| {
            a.saturating_add(b)
        })
        .fallible("Divide", "Divides a by b.", divide)
}

/// Handshake the in-process calculator reports.
#[must_use]
pub fn calculator_handshake() -> HandshakeConfig {
    HandshakeConfig::new(1, "TETHER_CALC", "calculator")
}

/// Descriptor named `calc` expecting the calculator's own handshake.
#[must_use]
pub fn calculator_descriptor() -> PluginDescriptor {
    PluginDescriptor::new("calc", "/unused/calculator", calculator_handshake())
}

fn start_failure(name: &str, error: &ServeError) -> PluginError {
    PluginError::SpawnFailed {
        name: name.to_owned(),
        message: error.to_string(),
        source: None,
    }
}

#[derive(Debug)]
struct ServedPlugin {
    server: Option<ServerHandle>,
    terminated: Arc<AtomicUsize>,
}

impl ProcessHandle for ServedPlugin {
    fn id(&self) -> Option<u32> {
        None
    }

    fn terminate(&mut self) -> Result<(), PluginError> {
        if let Some(server) = self.server.take() {
            server.shutdown();
            server.join().map_err(|err| PluginError::TerminateFailed {
                name: String::from("in-process"),
                message: err.to_string(),
                source: None,
            })?;
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Negotiates by serving [`calculator`] on a loopback port.
///
/// The served side's handshake is fixed to [`calculator_handshake`];
/// descriptors expecting anything else fail with
/// [`PluginError::HandshakeMismatch`]. Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct InProcessNegotiator {
    spawned: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

impl InProcessNegotiator {
    /// Creates a negotiator with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of negotiations attempted.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Number of served plugins shut down.
    #[must_use]
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Negotiator for InProcessNegotiator {
    fn negotiate(&self, descriptor: &PluginDescriptor) -> Result<LiveConnection, PluginError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        descriptor
            .handshake()
            .verify(&calculator_handshake())
            .map_err(|mismatch| PluginError::HandshakeMismatch {
                name: descriptor.name().to_owned(),
                field: mismatch.field,
                expected: mismatch.expected,
                actual: mismatch.actual,
            })?;
        let server = PluginListener::bind_tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .and_then(|listener| listener.spawn(Arc::new(calculator())))
            .map_err(|err| start_failure(descriptor.name(), &err))?;
        let endpoint = server.endpoint().clone();
        let process = ServedPlugin {
            server: Some(server),
            terminated: Arc::clone(&self.terminated),
        };
        Ok(LiveConnection::new(
            descriptor.name(),
            endpoint,
            Box::new(process),
        ))
    }
}
