//! Derivation of canonical type tags from operation shapes.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use super::{ImplementationShape, Introspect, MethodSpec, OperationShape, PluginAbi, TypeShape};
use crate::error::PluginError;

/// Tracing target for ABI generation.
const ABI_TARGET: &str = "tether_plugins::abi";

/// Suffix appended to the return tag of fallible methods.
const ERROR_SUFFIX: &str = ",error";

/// Built-in tags for named Rust types.
fn base_tag(name: &str) -> Option<&'static str> {
    let tag = match name {
        "i8" | "i16" | "i32" => "int32",
        "i64" | "i128" | "isize" => "int64",
        "u8" | "u16" | "u32" => "uint32",
        "u64" | "u128" | "usize" => "uint64",
        "f32" | "f64" => "float64",
        "bool" => "bool",
        "String" | "str" | "char" => "string",
        "OffsetDateTime" | "PrimitiveDateTime" | "SystemTime" => "time",
        "()" => "void",
        _ => return None,
    };
    Some(tag)
}

/// Produces [`PluginAbi`] descriptions from introspectable implementations.
///
/// Overrides registered with [`AbiGenerator::add_type_mapping`] take
/// precedence over the built-in table for named types. The override table is
/// guarded by a read/write lock so a shared generator may be consulted
/// concurrently.
///
/// # Example
///
/// ```
/// use tether_plugins::abi::{AbiGenerator, OperationShape, TypeShape};
///
/// let generator = AbiGenerator::new();
/// let shapes = vec![OperationShape::new(
///     "Add",
///     vec![TypeShape::named("i64"), TypeShape::named("i64")],
///     TypeShape::named("i64"),
///     false,
/// )];
/// let abi = generator
///     .generate_from_instance("calc", "1.0.0", &shapes)
///     .expect("introspectable");
/// assert_eq!(abi.method("Add").map(|m| m.returns.as_str()), Some("int64"));
/// ```
#[derive(Debug, Default)]
pub struct AbiGenerator {
    overrides: RwLock<HashMap<String, String>>,
}

impl AbiGenerator {
    /// Creates a generator with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tag for a named type, replacing any earlier override.
    pub fn add_type_mapping(&self, type_name: impl Into<String>, tag: impl Into<String>) {
        let mut overrides = self
            .overrides
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        overrides.insert(type_name.into(), tag.into());
    }

    /// Returns the override registered for `type_name`, if any.
    #[must_use]
    pub fn type_mapping(&self, type_name: &str) -> Option<String> {
        self.overrides
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(type_name)
            .cloned()
    }

    /// Derives the canonical tag for a shape.
    #[must_use]
    pub fn type_tag(&self, shape: &TypeShape) -> String {
        match shape {
            TypeShape::Named(name) => self
                .type_mapping(name)
                .or_else(|| base_tag(name).map(str::to_owned))
                .unwrap_or_else(|| name.clone()),
            TypeShape::Ref(inner) => format!("*{}", self.type_tag(inner)),
            TypeShape::Seq(inner) => format!("[]{}", self.type_tag(inner)),
            TypeShape::Map(key, value) => {
                format!("map[{}]{}", self.type_tag(key), self.type_tag(value))
            }
            TypeShape::Any => String::from("any"),
            TypeShape::Unit => String::from("void"),
        }
    }

    /// Builds the wire signature of one operation.
    #[must_use]
    pub fn method_spec(&self, operation: &OperationShape) -> MethodSpec {
        let params = operation
            .params
            .iter()
            .map(|param| self.type_tag(param))
            .collect();
        let mut returns = self.type_tag(&operation.returns);
        if operation.fallible {
            returns.push_str(ERROR_SUFFIX);
        }
        MethodSpec { params, returns }
    }

    /// Generates the ABI of an introspectable implementation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotIntrospectable`] when the implementation does
    /// not expose a set of operations.
    pub fn generate_from_instance(
        &self,
        name: &str,
        version: &str,
        implementation: &dyn Introspect,
    ) -> Result<PluginAbi, PluginError> {
        match implementation.implementation_shape() {
            ImplementationShape::Object(operations) => {
                Ok(self.generate_from_shapes(name, version, &operations))
            }
            ImplementationShape::Opaque(found) => Err(PluginError::NotIntrospectable {
                name: name.to_owned(),
                message: format!("expected an object exposing operations, found {found}"),
            }),
        }
    }

    /// Generates an ABI from a list of operation shapes.
    #[must_use]
    pub fn generate_from_shapes(
        &self,
        name: &str,
        version: &str,
        operations: &[OperationShape],
    ) -> PluginAbi {
        let mut abi = PluginAbi::new(name, version);
        for operation in operations {
            abi.insert_method(operation.name.clone(), self.method_spec(operation));
        }
        debug!(
            target: ABI_TARGET,
            plugin = name,
            methods = abi.methods.len(),
            "generated plugin ABI"
        );
        abi
    }
}
