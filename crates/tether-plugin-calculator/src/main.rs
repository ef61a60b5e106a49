//! Binary entrypoint for the calculator plugin.

use std::io::{self, Write};

fn main() {
    if let Err(error) = tether_plugin_calculator::run() {
        writeln!(io::stderr().lock(), "{error}").ok();
        std::process::exit(1);
    }
}
