//! Error types for the CLI runtime.

use std::io;

use tether_plugins::PluginError;
use tether_plugins::telemetry::TelemetryError;
use thiserror::Error;

/// Exit status for usage errors.
pub(crate) const USAGE_EXIT: u8 = 2;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to configure logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("plugin '{name}' is not listed in {config}")]
    UnknownPlugin { name: String, config: String },
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("{count} plugin(s) failed to load:\n{details}")]
    PartialLoad { count: usize, details: String },
    #[error("failed to serialise output: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}

impl AppError {
    pub(crate) const fn exit_code(&self) -> u8 {
        match self {
            Self::CliUsage(_) | Self::UnknownPlugin { .. } => USAGE_EXIT,
            _ => 1,
        }
    }
}
