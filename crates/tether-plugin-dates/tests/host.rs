//! End-to-end tests: the real dates binary driven by a plugin manager.

use std::path::PathBuf;

use rstest::{fixture, rstest};
use tether_plugins::{
    HandshakeConfig, MethodSpec, PluginDescriptor, PluginError, PluginManager, Value,
};
use time::macros::datetime;

#[fixture]
fn manager() -> PluginManager {
    let manager = PluginManager::new();
    manager
        .load(PluginDescriptor::new(
            "dates",
            PathBuf::from(env!("CARGO_BIN_EXE_tether-plugin-dates")),
            HandshakeConfig::for_plugin("dates"),
        ))
        .expect("load dates");
    manager
}

#[rstest]
fn add_days_abi_uses_canonical_tags(manager: PluginManager) {
    let abi = manager.describe("dates").expect("describe");
    assert_eq!(
        abi.method("AddDays"),
        Some(&MethodSpec {
            params: vec!["time".into(), "int64".into()],
            returns: "time,error".into(),
        })
    );
    assert_eq!(
        abi.method("Between").map(|spec| spec.returns.as_str()),
        Some("int64")
    );
}

#[rstest]
fn timestamps_round_trip_through_the_plugin(manager: PluginManager) {
    let shifted = manager
        .invoke(
            "dates",
            "AddDays",
            vec![Value::Timestamp(datetime!(2024-02-28 09:30 UTC)), Value::Int(2)],
        )
        .expect("add days");
    assert_eq!(shifted, Value::Timestamp(datetime!(2024-03-01 09:30 UTC)));

    let days: i64 = manager
        .invoke_typed(
            "dates",
            "Between",
            (datetime!(2024-01-01 00:00 UTC), datetime!(2024-12-31 00:00 UTC)),
        )
        .expect("between");
    assert_eq!(days, 365);
}

#[rstest]
fn string_date_is_bad_arguments(manager: PluginManager) {
    let err = manager
        .invoke(
            "dates",
            "AddDays",
            vec![Value::String("2024-01-01".into()), Value::Int(1)],
        )
        .expect_err("string is not a timestamp");
    assert!(matches!(err, PluginError::BadArguments { .. }), "unexpected error: {err}");
}

#[rstest]
fn out_of_range_year_is_a_remote_failure(manager: PluginManager) {
    let start = Value::Timestamp(datetime!(2024-01-01 00:00 UTC));
    let err = manager
        .invoke("dates", "AddDays", vec![start.clone(), Value::Int(-800_000)])
        .expect_err("year -0167");
    assert!(
        matches!(err, PluginError::Remote { ref message, .. } if message.contains("0000 to 9999")),
        "unexpected error: {err}"
    );
    let next = manager
        .invoke("dates", "AddDays", vec![start, Value::Int(1)])
        .expect("plugin still serves");
    assert_eq!(next, Value::Timestamp(datetime!(2024-01-02 00:00 UTC)));
}
