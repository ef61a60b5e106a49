//! Crate-level integration and BDD tests.

use crate::manifest::RegistryConfig;
use crate::registry::PluginManager;
use crate::testing::{InProcessNegotiator, calculator_descriptor};
use crate::value::Value;


#[test]
fn end_to_end_config_load_and_invoke() {
    let probe = InProcessNegotiator::new();
    let manager = PluginManager::with_negotiator(probe.clone());

    let report = manager.load_config(RegistryConfig::new(vec![calculator_descriptor()]));
    assert!(report.is_complete());

    let abi = manager.describe("calc").expect("describe");
    assert_eq!(abi.name, "calc");
    let sum = manager
        .invoke("calc", "Add", vec![Value::Int(40), Value::Int(2)])
        .expect("add");
    assert_eq!(sum, Value::Int(42));

    drop(manager);
    assert_eq!(probe.terminated(), 1);
}
