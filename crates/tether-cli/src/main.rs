//! CLI entrypoint for the tether plugin host.
//!
//! The binary delegates to [`tether_cli::run`], which parses arguments,
//! loads the configured plugins, and renders the result.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tether_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
