//! Binary entrypoint for the strings plugin.

use std::io::{self, Write};

fn main() {
    if let Err(error) = tether_plugin_strings::run() {
        writeln!(io::stderr().lock(), "{error}").ok();
        std::process::exit(1);
    }
}
