//! Plugin ABI descriptions and the shapes they are generated from.
//!
//! A plugin exposes a set of [`OperationShape`]s describing each exported
//! method's parameter and return types. The [`AbiGenerator`] turns those
//! shapes into a [`PluginAbi`] whose type tags (`int64`, `time`, `[]string`,
//! and so on) are stable across languages and releases.

mod generator;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::generator::AbiGenerator;

/// Structural description of a parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeShape {
    /// A type identified by name, such as `i64` or `OffsetDateTime`.
    Named(String),
    /// A nullable reference to another type.
    Ref(Box<TypeShape>),
    /// A homogeneous sequence.
    Seq(Box<TypeShape>),
    /// A map from key type to value type.
    Map(Box<TypeShape>, Box<TypeShape>),
    /// Any value.
    Any,
    /// No value.
    Unit,
}

impl TypeShape {
    /// Creates a named shape.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// Maps a Rust type to its [`TypeShape`].
///
/// Implemented for every type that may appear in a plugin method signature.
pub trait Shaped {
    /// Returns the shape of `Self`.
    fn shape() -> TypeShape;
}

/// Signature of one exported method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationShape {
    /// Method name.
    pub name: String,
    /// Parameter shapes in positional order.
    pub params: Vec<TypeShape>,
    /// Return shape.
    pub returns: TypeShape,
    /// Whether the method may return a structured error.
    pub fallible: bool,
}

impl OperationShape {
    /// Creates an operation shape.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        params: Vec<TypeShape>,
        returns: TypeShape,
        fallible: bool,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            fallible,
        }
    }
}

/// What an implementation exposes for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImplementationShape {
    /// A set of callable operations.
    Object(Vec<OperationShape>),
    /// Nothing enumerable; the value carries a description of what was found.
    Opaque(String),
}

/// Implementations whose exported operations can be enumerated.
pub trait Introspect {
    /// Reports the implementation's shape.
    fn implementation_shape(&self) -> ImplementationShape;
}

impl Introspect for [OperationShape] {
    fn implementation_shape(&self) -> ImplementationShape {
        ImplementationShape::Object(self.to_vec())
    }
}

impl Introspect for Vec<OperationShape> {
    fn implementation_shape(&self) -> ImplementationShape {
        self.as_slice().implementation_shape()
    }
}

/// Wire signature of one method in a [`PluginAbi`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Parameter type tags.
    pub params: Vec<String>,
    /// Return type tag, suffixed with `,error` for fallible methods.
    pub returns: String,
}

/// Language-neutral description of a plugin's callable surface.
///
/// Methods are held in an ordered map so serialisation is byte-stable.
///
/// # Example
///
/// ```
/// use tether_plugins::abi::{MethodSpec, PluginAbi};
///
/// let mut abi = PluginAbi::new("calc", "1.0.0");
/// abi.insert_method("Add", MethodSpec {
///     params: vec!["int64".into(), "int64".into()],
///     returns: "int64".into(),
/// });
/// assert_eq!(abi.method("Add").map(|spec| spec.params.len()), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAbi {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Exported methods keyed by name.
    #[serde(default)]
    pub methods: BTreeMap<String, MethodSpec>,
}

impl PluginAbi {
    /// Creates an ABI with no methods.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Adds or replaces a method.
    pub fn insert_method(&mut self, name: impl Into<String>, spec: MethodSpec) {
        self.methods.insert(name.into(), spec);
    }

    /// Looks up a method.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    /// Returns `true` when the ABI exports no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
