//! CLI argument definitions for the `tether` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tether_plugins::telemetry::LogFormat;

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text, one item per line.
    #[default]
    Text,
    /// JSON documents.
    Json,
}

/// Command-line interface for the tether plugin host.
#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Loads out-of-process plugins and calls their methods",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Registry configuration file listing the plugins.
    #[arg(long, short = 'c', env = "TETHER_CONFIG", default_value = "plugins.json")]
    pub(crate) config: PathBuf,
    /// Overrides every plugin's per-call timeout, in milliseconds.
    #[arg(
        long,
        env = "TETHER_CALL_TIMEOUT_MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub(crate) call_timeout_ms: Option<u64>,
    /// Log filter directive for host-side logging.
    #[arg(long, env = "TETHER_LOG", default_value = "warn")]
    pub(crate) log_filter: String,
    /// Log output format.
    #[arg(long, env = "TETHER_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
    /// Controls how results are rendered.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub(crate) output: OutputFormat,
    /// The command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `tether` binary.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Loads every configured plugin and lists its methods.
    List,
    /// Prints the ABI of one plugin.
    Describe {
        /// Plugin name from the configuration.
        plugin: String,
    },
    /// Calls a plugin method.
    ///
    /// Arguments are typed by inference: integers, floats, `true`/`false`,
    /// `null` and RFC 3339 timestamps; anything else is a string.
    Invoke {
        /// Plugin name from the configuration.
        plugin: String,
        /// Method name.
        method: String,
        /// Positional arguments.
        #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Prints help for one method, or a summary of every method.
    Help {
        /// Plugin name from the configuration.
        plugin: String,
        /// Method name; omit for the summary.
        method: Option<String>,
    },
    /// Prints a plugin's version.
    Version {
        /// Plugin name from the configuration.
        plugin: String,
    },
}
