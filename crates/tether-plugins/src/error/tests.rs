//! Unit tests for plugin error types.

use std::path::PathBuf;
use std::sync::Arc;

use rstest::rstest;

use super::*;

#[test]
fn not_loaded_error_message_includes_name() {
    let error = PluginError::NotLoaded {
        name: "calc".into(),
    };
    let message = error.to_string();
    assert!(
        message.contains("calc"),
        "expected name in message: {message}"
    );
    assert!(
        message.contains("not loaded"),
        "expected 'not loaded' in message: {message}"
    );
}

#[test]
fn method_not_found_names_plugin_and_method() {
    let error = PluginError::MethodNotFound {
        name: "calc".into(),
        method: "Pow".into(),
    };
    let message = error.to_string();
    assert!(message.contains("calc"), "expected name in message: {message}");
    assert!(message.contains("Pow"), "expected method in message: {message}");
}

#[test]
fn handshake_mismatch_reports_field_and_values() {
    let error = PluginError::HandshakeMismatch {
        name: "calc".into(),
        field: HandshakeField::MagicCookieValue,
        expected: "calculator".into(),
        actual: "imposter".into(),
    };
    let message = error.to_string();
    assert!(
        message.contains("magic cookie value"),
        "expected field in message: {message}"
    );
    assert!(message.contains("calculator"), "{message}");
    assert!(message.contains("imposter"), "{message}");
}

#[rstest]
#[case::timeout(
    PluginError::Timeout {
        name: "slow".into(),
        operation: "handshake".into(),
        timeout_ms: 4200,
    },
    "4200"
)]
#[case::remote(
    PluginError::Remote {
        name: "calc".into(),
        method: "Divide".into(),
        message: "division by zero".into(),
    },
    "division by zero"
)]
#[case::bad_arguments(
    PluginError::BadArguments {
        name: "calc".into(),
        method: "Add".into(),
        message: "expected 2 arguments, got 1".into(),
    },
    "expected 2 arguments"
)]
fn error_message_includes_detail(#[case] error: PluginError, #[case] expected: &str) {
    let message = error.to_string();
    assert!(
        message.contains(expected),
        "expected {expected} in message: {message}"
    );
}

#[test]
fn transport_error_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    // PluginError wraps Arc<io::Error> to keep it Send+Sync.
    let error = PluginError::Transport {
        name: "test".into(),
        message: "broken pipe".into(),
        source: Some(Arc::new(std::io::Error::other("broken pipe"))),
    };
    assert_send_sync::<PluginError>();
    let message = error.to_string();
    assert!(
        message.contains("test"),
        "expected plugin name in message: {message}"
    );
}

#[test]
fn invalid_path_includes_path_and_reason() {
    let error = PluginError::InvalidPath {
        name: "missing".into(),
        path: PathBuf::from("/usr/bin/missing-plugin"),
        reason: "no such file".into(),
    };
    let message = error.to_string();
    assert!(
        message.contains("/usr/bin/missing-plugin"),
        "expected path in message: {message}"
    );
    assert!(message.contains("no such file"), "{message}");
}

#[rstest]
#[case::method_not_found(PluginError::MethodNotFound { name: "p".into(), method: "m".into() }, true)]
#[case::remote(PluginError::Remote { name: "p".into(), method: "m".into(), message: "x".into() }, true)]
#[case::not_loaded(PluginError::NotLoaded { name: "p".into() }, false)]
#[case::transport(PluginError::transport("p", std::io::Error::other("gone")), false)]
fn call_level_classification(#[case] error: PluginError, #[case] expected: bool) {
    assert_eq!(error.is_call_level(), expected);
}
