//! Binary entrypoint for the dates plugin.

use std::io::{self, Write};

fn main() {
    if let Err(error) = tether_plugin_dates::run() {
        writeln!(io::stderr().lock(), "{error}").ok();
        std::process::exit(1);
    }
}
