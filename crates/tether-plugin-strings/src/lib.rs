//! Text transformation plugin.

use tether_plugins::server::{self, MethodTable, ServeError};

/// Name the plugin registers under and derives its handshake from.
pub const PLUGIN_NAME: &str = "strings";

fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect()
    })
}

/// Reverses by Unicode scalar value.
#[must_use]
pub fn reverse(text: String) -> String {
    text.chars().rev().collect()
}

/// Uppercases every character.
#[must_use]
pub fn to_upper(text: String) -> String {
    text.to_uppercase()
}

/// Lowercases every character.
#[must_use]
pub fn to_lower(text: String) -> String {
    text.to_lowercase()
}

/// Capitalises each whitespace-separated word and joins them with spaces.
#[must_use]
pub fn to_title(text: String) -> String {
    text.split_whitespace()
        .map(capitalise)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Joins words in lower camel case: `hello big world` becomes
/// `helloBigWorld`.
#[must_use]
pub fn to_camel(text: String) -> String {
    let mut words = text.split_whitespace();
    let head = words.next().map(str::to_lowercase).unwrap_or_default();
    words.fold(head, |mut camel, word| {
        camel.push_str(&capitalise(word));
        camel
    })
}

/// Converts camel case and spaced words to snake case.
#[must_use]
pub fn to_snake(text: String) -> String {
    let mut snake = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_whitespace() || ch == '-' {
            if !snake.ends_with('_') {
                snake.push('_');
            }
        } else if ch.is_uppercase() {
            if !snake.is_empty() && !snake.ends_with('_') {
                snake.push('_');
            }
            snake.extend(ch.to_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

/// Builds the method table served by the binary.
#[must_use]
pub fn method_table() -> MethodTable {
    MethodTable::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
        .infallible("Reverse", "Reverses a string.", reverse)
        .infallible("ToUpper", "Converts a string to upper case.", to_upper)
        .infallible("ToLower", "Converts a string to lower case.", to_lower)
        .infallible("ToTitle", "Capitalises each word.", to_title)
        .infallible("ToCamel", "Converts words to camelCase.", to_camel)
        .infallible("ToSnake", "Converts camelCase or words to snake_case.", to_snake)
}

/// Serves the strings plugin until the host terminates the process.
///
/// # Errors
///
/// Returns [`ServeError`] when run outside a host or when the listener
/// cannot start.
pub fn run() -> Result<(), ServeError> {
    server::run_plugin(method_table())
}
