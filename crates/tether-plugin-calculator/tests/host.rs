//! End-to-end tests: the real calculator binary driven by a plugin manager.

use std::path::PathBuf;

use rstest::{fixture, rstest};
use tether_plugins::{
    HandshakeConfig, MethodSpec, PluginDescriptor, PluginError, PluginManager, PluginState, Value,
};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tether-plugin-calculator"))
}

fn descriptor(handshake: HandshakeConfig) -> PluginDescriptor {
    PluginDescriptor::new("calc", binary(), handshake)
}

#[fixture]
fn manager() -> PluginManager {
    let manager = PluginManager::new();
    manager
        .load(descriptor(HandshakeConfig::for_plugin("calculator")))
        .expect("load calculator");
    manager
}

#[rstest]
fn abi_describes_integer_methods(manager: PluginManager) {
    let abi = manager.describe("calc").expect("describe");
    assert_eq!(abi.name, "calc");
    assert_eq!(
        abi.method("Divide"),
        Some(&MethodSpec {
            params: vec!["int64".into(), "int64".into()],
            returns: "int64,error".into(),
        })
    );
    assert_eq!(abi.methods.len(), 4);
}

#[rstest]
fn add_then_divide_by_zero_then_add(manager: PluginManager) {
    let sum = manager
        .invoke("calc", "Add", vec![Value::Int(5), Value::Int(3)])
        .expect("add");
    assert_eq!(sum, Value::Int(8));

    let err = manager
        .invoke("calc", "Divide", vec![Value::Int(5), Value::Int(0)])
        .expect_err("division by zero");
    assert!(
        matches!(err, PluginError::Remote { ref message, .. } if message.contains("division by zero")),
        "unexpected error: {err}"
    );

    let typed: i64 = manager
        .invoke_typed("calc", "Multiply", (6_i64, 7_i64))
        .expect("multiply");
    assert_eq!(typed, 42);
}

#[rstest]
fn unknown_method_and_bad_arguments(manager: PluginManager) {
    let missing = manager
        .invoke("calc", "Pow", vec![Value::Int(2), Value::Int(3)])
        .expect_err("unknown method");
    assert!(matches!(missing, PluginError::MethodNotFound { ref method, .. } if method == "Pow"));

    let mistyped = manager
        .invoke("calc", "Add", vec![Value::Float(1.5), Value::Int(3)])
        .expect_err("float is not an integer");
    assert!(matches!(mistyped, PluginError::BadArguments { .. }));
}

#[rstest]
fn help_and_version(manager: PluginManager) {
    assert_eq!(
        manager.version("calc").expect("version"),
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(
        manager.help("calc", Some("Add")).expect("help"),
        "Adds two integers."
    );
}

#[rstest]
fn unload_all_twice(manager: PluginManager) {
    manager.unload_all();
    manager.unload_all();
    assert_eq!(manager.state("calc"), PluginState::Unloaded);
    assert!(manager.loaded_names().is_empty());
}

#[rstest]
#[case::version(HandshakeConfig::new(2, "TETHER_PLUGIN_CALCULATOR", "calculator"))]
#[case::secret(HandshakeConfig::new(1, "TETHER_PLUGIN_CALCULATOR", "imposter"))]
fn mismatched_handshake_is_rejected(#[case] handshake: HandshakeConfig) {
    let manager = PluginManager::new();
    let err = manager.load(descriptor(handshake)).expect_err("mismatch");
    assert!(
        matches!(
            err,
            PluginError::HandshakeMismatch { .. } | PluginError::StartupFailed { .. }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(manager.state("calc"), PluginState::Unloaded);
}

#[test]
fn running_directly_refuses() {
    let output = std::process::Command::new(binary())
        .env_remove("TETHER_PROTOCOL_VERSION")
        .output()
        .expect("run binary");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not meant to be executed directly"), "{stderr}");
}
