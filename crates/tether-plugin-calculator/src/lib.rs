//! Integer calculator plugin.
//!
//! Exposes `Add`, `Subtract`, `Multiply` and `Divide` over 64-bit integers.
//! Overflow saturates, and division by zero is reported to the host as a
//! remote failure.

use tether_plugins::server::{self, MethodTable, ServeError};
use tracing::debug;

/// Name the plugin registers under and derives its handshake from.
pub const PLUGIN_NAME: &str = "calculator";

const CALCULATOR_TARGET: &str = "tether_plugin_calculator";

/// Adds two integers, saturating on overflow.
#[must_use]
pub const fn add(a: i64, b: i64) -> i64 {
    a.saturating_add(b)
}

/// Subtracts `b` from `a`, saturating on overflow.
#[must_use]
pub const fn subtract(a: i64, b: i64) -> i64 {
    a.saturating_sub(b)
}

/// Multiplies two integers, saturating on overflow.
#[must_use]
pub const fn multiply(a: i64, b: i64) -> i64 {
    a.saturating_mul(b)
}

/// Divides `a` by `b`, truncating toward zero.
///
/// # Errors
///
/// Fails when `b` is zero or the quotient overflows.
pub fn divide(a: i64, b: i64) -> Result<i64, String> {
    if b == 0 {
        return Err(String::from("division by zero"));
    }
    a.checked_div(b)
        .ok_or_else(|| format!("{a} / {b} overflows a 64-bit integer"))
}

/// Builds the method table served by the binary.
#[must_use]
pub fn method_table() -> MethodTable {
    MethodTable::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
        .infallible("Add", "Adds two integers.", |a: i64, b: i64| {
            let sum = add(a, b);
            debug!(target: CALCULATOR_TARGET, a, b, result = sum, "Add called");
            sum
        })
        .infallible("Subtract", "Subtracts the second integer from the first.", subtract)
        .infallible("Multiply", "Multiplies two integers.", multiply)
        .fallible("Divide", "Divides the first integer by the second.", divide)
}

/// Serves the calculator until the host terminates the process.
///
/// # Errors
///
/// Returns [`ServeError`] when run outside a host or when the listener
/// cannot start.
pub fn run() -> Result<(), ServeError> {
    server::run_plugin(method_table())
}
