//! Command-line front-end for the tether plugin host.
//!
//! The runtime parses arguments, reads the registry configuration, loads the
//! plugins a command needs, and renders results as plain text or JSON. It can
//! be driven from the binary entrypoint or from tests, where the plugin
//! manager and IO streams are substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tether_plugins::manifest::Timeouts;
use tether_plugins::process::Negotiator;
use tether_plugins::telemetry;
use tether_plugins::{PluginAbi, PluginDescriptor, PluginManager, RegistryConfig, Value};
use tracing::warn;

mod cli;
mod errors;

#[cfg(test)]
mod tests;

pub use cli::OutputFormat;
use cli::{Cli, Command};
use errors::AppError;

const CLI_TARGET: &str = "tether_cli";

/// Runs the CLI against real plugin processes.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let manager = PluginManager::new();
    ExitCode::from(run_with_manager(args, &manager, stdout, stderr))
}

fn run_with_manager<N, I, W, E>(
    args: I,
    manager: &PluginManager<N>,
    stdout: &mut W,
    stderr: &mut E,
) -> u8
where
    N: Negotiator,
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let result = Cli::try_parse_from(args)
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            telemetry::initialise(&cli.log_filter, cli.log_format)?;
            let outcome = dispatch(&cli, manager, stdout);
            manager.unload_all();
            outcome
        });
    finish(result, stdout, stderr)
}

fn finish<W: Write, E: Write>(result: Result<(), AppError>, stdout: &mut W, stderr: &mut E) -> u8 {
    match result {
        Ok(()) => 0,
        // `--help` and `--version` arrive as clap errors destined for stdout.
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            write!(stdout, "{}", error.render()).ok();
            0
        }
        Err(AppError::CliUsage(error)) => {
            write!(stderr, "{}", error.render()).ok();
            errors::USAGE_EXIT
        }
        Err(error) => {
            writeln!(stderr, "tether: {error}").ok();
            error.exit_code()
        }
    }
}

fn dispatch<N: Negotiator, W: Write>(
    cli: &Cli,
    manager: &PluginManager<N>,
    out: &mut W,
) -> Result<(), AppError> {
    let descriptors = registry(cli)?;
    match &cli.command {
        Command::List => list(descriptors, manager, cli.output, out),
        Command::Describe { plugin } => {
            load_named(cli, descriptors, plugin, manager)?;
            let abi = manager.describe(plugin)?;
            render_abis(&[abi], cli.output, out)
        }
        Command::Invoke {
            plugin,
            method,
            args,
        } => {
            load_named(cli, descriptors, plugin, manager)?;
            let values = args.iter().map(|raw| Value::infer(raw)).collect();
            let value = manager.invoke(plugin, method, values)?;
            match cli.output {
                OutputFormat::Text => writeln!(out, "{value}")?,
                OutputFormat::Json => writeln!(out, "{}", value.to_json())?,
            }
            Ok(())
        }
        Command::Help { plugin, method } => {
            load_named(cli, descriptors, plugin, manager)?;
            let text = manager.help(plugin, method.as_deref())?;
            let document = json!({ "plugin": plugin, "method": method, "help": text });
            render_text(text.trim_end(), &document, cli.output, out)
        }
        Command::Version { plugin } => {
            load_named(cli, descriptors, plugin, manager)?;
            let version = manager.version(plugin)?;
            let document = json!({ "plugin": plugin, "version": version });
            render_text(&version, &document, cli.output, out)
        }
    }
}

/// Reads the configured descriptors, applying the call timeout override.
fn registry(cli: &Cli) -> Result<Vec<PluginDescriptor>, AppError> {
    let descriptors = RegistryConfig::from_path(&cli.config)?.into_plugins();
    let Some(millis) = cli.call_timeout_ms else {
        return Ok(descriptors);
    };
    Ok(descriptors
        .into_iter()
        .map(|descriptor| {
            let timeouts = Timeouts::new(
                descriptor.timeouts().handshake(),
                Duration::from_millis(millis),
            );
            descriptor.with_timeouts(timeouts)
        })
        .collect())
}

fn load_named<N: Negotiator>(
    cli: &Cli,
    descriptors: Vec<PluginDescriptor>,
    name: &str,
    manager: &PluginManager<N>,
) -> Result<(), AppError> {
    let descriptor = descriptors
        .into_iter()
        .find(|descriptor| descriptor.name() == name)
        .ok_or_else(|| AppError::UnknownPlugin {
            name: name.to_owned(),
            config: cli.config.display().to_string(),
        })?;
    manager.load(descriptor)?;
    Ok(())
}

fn list<N: Negotiator, W: Write>(
    descriptors: Vec<PluginDescriptor>,
    manager: &PluginManager<N>,
    output: OutputFormat,
    out: &mut W,
) -> Result<(), AppError> {
    let report = manager.load_config(RegistryConfig::new(descriptors));
    let mut abis = Vec::with_capacity(report.loaded.len());
    let mut failures = Vec::new();
    for name in &report.loaded {
        match manager.describe(name) {
            Ok(abi) => abis.push(abi),
            Err(error) => failures.push(format!("  {name}: {error}")),
        }
    }
    for (name, error) in &report.failed {
        warn!(target: CLI_TARGET, plugin = name.as_str(), %error, "plugin failed to load");
        failures.push(format!("  {name}: {error}"));
    }
    render_abis(&abis, output, out)?;
    if failures.is_empty() {
        return Ok(());
    }
    Err(AppError::PartialLoad {
        count: failures.len(),
        details: failures.join("\n"),
    })
}

fn render_abis<W: Write>(
    abis: &[PluginAbi],
    output: OutputFormat,
    out: &mut W,
) -> Result<(), AppError> {
    if output == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut *out, abis)?;
        writeln!(out)?;
        return Ok(());
    }
    for abi in abis {
        writeln!(out, "{} {}", abi.name, abi.version)?;
        for (method, spec) in &abi.methods {
            writeln!(
                out,
                "  {method}({}) -> {}",
                spec.params.join(", "),
                spec.returns
            )?;
        }
    }
    Ok(())
}

fn render_text<W: Write>(
    text: &str,
    document: &serde_json::Value,
    output: OutputFormat,
    out: &mut W,
) -> Result<(), AppError> {
    match output {
        OutputFormat::Text => writeln!(out, "{text}")?,
        OutputFormat::Json => writeln!(out, "{document}")?,
    }
    Ok(())
}
