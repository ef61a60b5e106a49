//! Unit tests for the host manager.

use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Barrier;
use std::thread;

use mockall::mock;
use rstest::{fixture, rstest};

use super::*;
use crate::abi::MethodSpec;
use crate::handshake::HandshakeField;
use crate::process::ProcessHandle;
use crate::testing::{InProcessNegotiator, calculator_descriptor, calculator_handshake};

#[fixture]
fn manager() -> PluginManager<InProcessNegotiator> {
    PluginManager::with_negotiator(InProcessNegotiator::default())
}

#[fixture]
fn loaded(manager: PluginManager<InProcessNegotiator>) -> PluginManager<InProcessNegotiator> {
    manager.load(calculator_descriptor()).expect("load calc");
    manager
}

#[rstest]
fn load_marks_plugin_loaded_with_abi(loaded: PluginManager<InProcessNegotiator>) {
    assert_eq!(loaded.state("calc"), PluginState::Loaded);
    assert_eq!(loaded.loaded_names(), vec![String::from("calc")]);
    let abi = loaded.describe("calc").expect("describe");
    assert!(!abi.is_empty());
    assert_eq!(
        abi.method("Divide"),
        Some(&MethodSpec {
            params: vec!["int64".into(), "int64".into()],
            returns: "int64,error".into(),
        })
    );
}

#[rstest]
fn describe_is_byte_stable(loaded: PluginManager<InProcessNegotiator>) {
    let first = serde_json::to_string(&loaded.describe("calc").expect("first")).expect("json");
    let second = serde_json::to_string(&loaded.describe("calc").expect("second")).expect("json");
    assert_eq!(first, second);
}

#[rstest]
fn forgotten_abi_is_refetched(loaded: PluginManager<InProcessNegotiator>) {
    let cached = loaded.describe("calc").expect("cached");
    loaded.forget_abi("calc");
    loaded.forget_abi("calc");
    assert_eq!(loaded.describe("calc").expect("refetched"), cached);
}

#[rstest]
fn invoke_round_trips(loaded: PluginManager<InProcessNegotiator>) {
    let sum = loaded
        .invoke("calc", "Add", vec![Value::Int(5), Value::Int(3)])
        .expect("add");
    assert_eq!(sum, Value::Int(8));
    let typed: i64 = loaded
        .invoke_typed("calc", "Divide", (9_i64, 3_i64))
        .expect("divide");
    assert_eq!(typed, 3);
}

#[rstest]
fn remote_failure_leaves_plugin_usable(loaded: PluginManager<InProcessNegotiator>) {
    let err = loaded
        .invoke("calc", "Divide", vec![Value::Int(5), Value::Int(0)])
        .expect_err("division by zero");
    assert!(
        matches!(err, PluginError::Remote { ref message, .. } if message.contains("division by zero")),
        "unexpected error: {err}"
    );
    let sum = loaded
        .invoke("calc", "Add", vec![Value::Int(1), Value::Int(1)])
        .expect("still usable");
    assert_eq!(sum, Value::Int(2));
}

#[rstest]
fn unknown_method_is_named(loaded: PluginManager<InProcessNegotiator>) {
    let err = loaded
        .invoke("calc", "Pow", vec![Value::Int(2), Value::Int(3)])
        .expect_err("unknown method");
    assert!(matches!(err, PluginError::MethodNotFound { ref method, .. } if method == "Pow"));
}

#[rstest]
fn help_and_version_delegate(loaded: PluginManager<InProcessNegotiator>) {
    assert_eq!(loaded.version("calc").expect("version"), "1.0.0");
    assert_eq!(
        loaded.help("calc", Some("Add")).expect("help"),
        "Adds two integers."
    );
    assert!(loaded.help("calc", None).expect("summary").contains("Divide"));
}

#[rstest]
fn unknown_plugin_is_not_loaded_and_nothing_spawns(manager: PluginManager<InProcessNegotiator>) {
    let err = manager
        .invoke("ghost", "Add", vec![])
        .expect_err("not loaded");
    assert!(matches!(err, PluginError::NotLoaded { ref name } if name == "ghost"));
    assert!(matches!(
        manager.describe("ghost"),
        Err(PluginError::NotLoaded { .. })
    ));
    assert_eq!(manager.negotiator.spawned(), 0);
}

#[rstest]
#[case::version(HandshakeConfig::new(2, "TETHER_CALC", "calculator"), HandshakeField::ProtocolVersion)]
#[case::secret(HandshakeConfig::new(1, "TETHER_CALC", "imposter"), HandshakeField::MagicCookieValue)]
fn handshake_mismatch_leaves_no_entry(
    manager: PluginManager<InProcessNegotiator>,
    #[case] expected: HandshakeConfig,
    #[case] field: HandshakeField,
) {
    let descriptor = PluginDescriptor::new("calc", "/unused/calculator", expected);
    let err = manager.load(descriptor).expect_err("mismatch");
    assert!(matches!(err, PluginError::HandshakeMismatch { field: found, .. } if found == field));
    assert_eq!(manager.state("calc"), PluginState::Unloaded);
    assert!(manager.loaded_names().is_empty());
    assert!(matches!(
        manager.describe("calc"),
        Err(PluginError::NotLoaded { .. })
    ));
}

#[rstest]
fn duplicate_load_is_rejected_without_spawning(loaded: PluginManager<InProcessNegotiator>) {
    let err = loaded.load(calculator_descriptor()).expect_err("duplicate");
    assert!(matches!(err, PluginError::AlreadyLoaded { ref name } if name == "calc"));
    assert_eq!(loaded.negotiator.spawned(), 1);
}

#[rstest]
fn invalid_descriptor_is_rejected_before_spawning(manager: PluginManager<InProcessNegotiator>) {
    let err = manager
        .load(PluginDescriptor::new("", "/unused", calculator_handshake()))
        .expect_err("invalid");
    assert!(matches!(err, PluginError::Config { .. }));
    assert_eq!(manager.negotiator.spawned(), 0);
}

#[rstest]
fn descriptor_is_kept_while_loaded(loaded: PluginManager<InProcessNegotiator>) {
    assert_eq!(loaded.descriptor("calc"), Some(calculator_descriptor()));
    assert_eq!(loaded.descriptor("ghost"), None);
}

#[rstest]
fn static_abi_skips_describe(manager: PluginManager<InProcessNegotiator>) {
    let mut abi = PluginAbi::new("calc", "static");
    abi.insert_method(
        "Add",
        MethodSpec {
            params: vec!["int64".into(), "int64".into()],
            returns: "int64".into(),
        },
    );
    manager
        .load(calculator_descriptor().with_abi(abi.clone()))
        .expect("load");
    assert_eq!(manager.describe("calc").expect("describe"), abi);
}

#[rstest]
fn generator_overrides_apply_to_fetched_abi(manager: PluginManager<InProcessNegotiator>) {
    manager.generator().add_type_mapping("i64", "long");
    manager.load(calculator_descriptor()).expect("load");
    let abi = manager.describe("calc").expect("describe");
    assert_eq!(
        abi.method("Add").map(|spec| spec.returns.as_str()),
        Some("long")
    );
}

#[rstest]
fn unload_all_is_idempotent(loaded: PluginManager<InProcessNegotiator>) {
    loaded.unload_all();
    assert!(loaded.loaded_names().is_empty());
    assert_eq!(loaded.state("calc"), PluginState::Unloaded);
    loaded.unload_all();
    assert!(loaded.loaded_names().is_empty());
    assert_eq!(loaded.negotiator.terminated(), 1);
    assert!(matches!(
        loaded.invoke("calc", "Add", vec![]),
        Err(PluginError::NotLoaded { .. })
    ));
}

#[test]
fn drop_unloads_plugins() {
    let probe = InProcessNegotiator::new();
    {
        let manager = PluginManager::with_negotiator(probe.clone());
        manager.load(calculator_descriptor()).expect("load");
    }
    assert_eq!(probe.terminated(), 1);
}

#[rstest]
fn concurrent_invokes_each_get_their_own_result(manager: PluginManager<InProcessNegotiator>) {
    manager.load(calculator_descriptor()).expect("load calc");
    manager
        .load(PluginDescriptor::new("twin", "/unused/calculator", calculator_handshake()))
        .expect("load twin");
    let barrier = Barrier::new(8);
    let shared = &manager;
    let gate = &barrier;

    let results: Vec<(i64, i64)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8_i64)
            .map(move |index| {
                scope.spawn(move || {
                    let plugin = if index & 1 == 0 { "calc" } else { "twin" };
                    gate.wait();
                    let sum: i64 = shared
                        .invoke_typed(plugin, "Add", (index, 100_i64))
                        .expect("concurrent add");
                    (index, sum)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker"))
            .collect()
    });

    assert_eq!(results.len(), 8);
    for (index, sum) in results {
        assert_eq!(sum, index + 100);
    }
    assert_eq!(manager.negotiator.spawned(), 2);
}

#[rstest]
fn racing_loads_of_one_name_spawn_once(manager: PluginManager<InProcessNegotiator>) {
    let barrier = Barrier::new(2);
    let shared = &manager;
    let gate = &barrier;
    let outcomes: Vec<Result<(), PluginError>> = thread::scope(|scope| {
        let racers: Vec<_> = (0..2)
            .map(move |_| {
                scope.spawn(move || {
                    gate.wait();
                    shared.load(calculator_descriptor())
                })
            })
            .collect();
        racers
            .into_iter()
            .map(|racer| racer.join().expect("racer"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(PluginError::AlreadyLoaded { name }) if name == "calc")),
        "unexpected outcomes: {outcomes:?}"
    );
    assert_eq!(manager.negotiator.spawned(), 1);
    assert_eq!(manager.state("calc"), PluginState::Loaded);
}

#[rstest]
fn load_config_reports_each_failure(manager: PluginManager<InProcessNegotiator>) {
    let config = RegistryConfig::new(vec![
        calculator_descriptor(),
        PluginDescriptor::new(
            "imposter",
            "/unused",
            HandshakeConfig::new(1, "TETHER_CALC", "wrong"),
        ),
    ]);
    let report = manager.load_config(config);
    assert_eq!(report.loaded, vec![String::from("calc")]);
    assert!(!report.is_complete());
    let (name, error) = report.failed.first().expect("one failure");
    assert_eq!(name, "imposter");
    assert!(matches!(error, PluginError::HandshakeMismatch { .. }));
}

#[cfg(unix)]
#[rstest]
fn load_directory_uses_visible_executables(manager: PluginManager<InProcessNegotiator>) {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("temp dir");
    for (file, mode) in [("calc", 0o755), (".hidden", 0o755), ("notes.txt", 0o644)] {
        let path = dir.path().join(file);
        fs::write(&path, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
    }
    fs::create_dir(dir.path().join("subdir")).expect("mkdir");

    let report = manager
        .load_directory(dir.path(), &calculator_handshake())
        .expect("read dir");
    assert_eq!(report.loaded, vec![String::from("calc")]);
    assert!(report.is_complete());
    assert_eq!(manager.negotiator.spawned(), 1);
}

#[rstest]
fn load_directory_reports_unreadable_dir(manager: PluginManager<InProcessNegotiator>) {
    let err = manager
        .load_directory(Path::new("/definitely/not/a/dir"), &calculator_handshake())
        .expect_err("missing dir");
    assert!(matches!(err, PluginError::Config { .. }));
}

mock! {
    Handle {}
    impl ProcessHandle for Handle {
        fn id(&self) -> Option<u32>;
        fn terminate(&mut self) -> Result<(), PluginError>;
    }
}

impl fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHandle").finish_non_exhaustive()
    }
}

mock! {
    Spawner {}
    impl Negotiator for Spawner {
        fn negotiate(&self, descriptor: &PluginDescriptor) -> Result<LiveConnection, PluginError>;
    }
}

fn unreachable_endpoint() -> Endpoint {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    Endpoint::Tcp(addr)
}

fn handle_expecting_terminate(result: Result<(), PluginError>) -> MockHandle {
    let mut handle = MockHandle::new();
    handle.expect_id().return_const(None::<u32>);
    let mut outcome = Some(result);
    handle
        .expect_terminate()
        .once()
        .returning(move || outcome.take().unwrap_or(Ok(())));
    handle
}

#[test]
fn failed_abi_fetch_terminates_process() {
    let mut spawner = MockSpawner::new();
    spawner.expect_negotiate().once().returning(|descriptor| {
        Ok(LiveConnection::new(
            descriptor.name(),
            unreachable_endpoint(),
            Box::new(handle_expecting_terminate(Ok(()))),
        ))
    });
    let manager = PluginManager::with_negotiator(spawner);
    let err = manager.load(calculator_descriptor()).expect_err("describe fails");
    assert!(matches!(err, PluginError::Transport { .. }), "unexpected error: {err}");
    assert_eq!(manager.state("calc"), PluginState::Unloaded);
}

#[test]
fn unload_all_continues_past_termination_failures() {
    let mut spawner = MockSpawner::new();
    spawner.expect_negotiate().times(2).returning(|descriptor| {
        let result = if descriptor.name() == "stubborn" {
            Err(PluginError::TerminateFailed {
                name: String::from("stubborn"),
                message: String::from("kill failed"),
                source: None,
            })
        } else {
            Ok(())
        };
        Ok(LiveConnection::new(
            descriptor.name(),
            unreachable_endpoint(),
            Box::new(handle_expecting_terminate(result)),
        ))
    });
    let manager = PluginManager::with_negotiator(spawner);
    let abi = PluginAbi::new("static", "1.0.0");
    for name in ["stubborn", "polite"] {
        manager
            .load(PluginDescriptor::new(name, "/unused", calculator_handshake()).with_abi(abi.clone()))
            .expect("load with static abi");
    }
    assert_eq!(manager.loaded_names().len(), 2);
    manager.unload_all();
    assert!(manager.loaded_names().is_empty());
}

#[test]
fn negotiation_failure_is_not_retried() {
    let mut spawner = MockSpawner::new();
    spawner.expect_negotiate().once().returning(|descriptor| {
        Err(PluginError::StartupFailed {
            name: descriptor.name().to_owned(),
            status: String::from("exit code 1"),
        })
    });
    let manager = PluginManager::with_negotiator(spawner);
    assert!(matches!(
        manager.load(calculator_descriptor()),
        Err(PluginError::StartupFailed { .. })
    ));
    assert_eq!(manager.state("calc"), PluginState::Unloaded);
}
