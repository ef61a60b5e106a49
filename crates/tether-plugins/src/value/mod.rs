//! Dynamically-typed values exchanged across the RPC boundary.
//!
//! Arguments and results travel as [`Value`], a tagged union serialised as
//! `{"type": "<kind>", "value": ...}`. Conversions to and from Rust types are
//! exhaustive and strict: an `int` never silently becomes a `float`, and an
//! out-of-range integer is rejected rather than truncated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::abi::{Shaped, TypeShape};

/// A single argument or result value.
///
/// # Example
///
/// ```
/// use tether_plugins::Value;
///
/// let value = Value::Int(5);
/// let json = serde_json::to_string(&value).expect("serialise");
/// assert_eq!(json, r#"{"type":"int","value":5}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Point in time, carried as RFC 3339 text.
    Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// String-keyed map with deterministic ordering.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the wire name of this value's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
        }
    }

    /// Returns `true` when every float inside the value is finite.
    ///
    /// JSON has no encoding for NaN or infinities.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(number) => number.is_finite(),
            Self::Seq(items) => items.iter().all(Self::is_finite),
            Self::Map(entries) => entries.values().all(Self::is_finite),
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::String(_) | Self::Timestamp(_) => {
                true
            }
        }
    }

    /// Infers a value from command-line text.
    ///
    /// Tries, in order: `null`, `true`/`false`, an integer, a finite float
    /// written with a decimal point or exponent, an RFC 3339 timestamp, and
    /// finally falls back to the raw string.
    ///
    /// # Example
    ///
    /// ```
    /// use tether_plugins::Value;
    ///
    /// assert_eq!(Value::infer("42"), Value::Int(42));
    /// assert_eq!(Value::infer("2.5"), Value::Float(2.5));
    /// assert_eq!(Value::infer("hello"), Value::String("hello".into()));
    /// ```
    #[must_use]
    pub fn infer(raw: &str) -> Self {
        match raw {
            "null" => return Self::Null,
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(int) = raw.parse::<i64>() {
            return Self::Int(int);
        }
        if raw.contains(['.', 'e', 'E'])
            && let Ok(float) = raw.parse::<f64>()
            && float.is_finite()
        {
            return Self::Float(float);
        }
        OffsetDateTime::parse(raw, &Rfc3339)
            .map_or_else(|_| Self::String(raw.to_owned()), Self::Timestamp)
    }

    /// Converts plain JSON into a value.
    ///
    /// Whole numbers become `int`, other numbers `float`, arrays `seq`, and
    /// objects `map`. Strings are never reinterpreted.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(text) => Self::String(text),
            serde_json::Value::Array(items) => {
                Self::Seq(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, item)| (key, Self::from_json(item)))
                    .collect(),
            ),
        }
    }

    /// Renders the value as plain JSON without type tags.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(flag) => serde_json::Value::Bool(*flag),
            Self::Int(int) => serde_json::Value::from(*int),
            Self::Float(float) => serde_json::Number::from_f64(*float)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(text) => serde_json::Value::String(text.clone()),
            Self::Timestamp(at) => serde_json::Value::String(format_timestamp(*at)),
            Self::Seq(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), item.to_json()))
                    .collect(),
            ),
        }
    }
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Timestamp(at) => f.write_str(&format_timestamp(*at)),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Reasons a [`Value`] could not be converted to a Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The value had the wrong kind.
    #[error("expected {expected}, found {found}")]
    Mismatch {
        /// Kind the target type accepts.
        expected: &'static str,
        /// Kind that was supplied.
        found: &'static str,
    },

    /// An integer did not fit the target type.
    #[error("{value} is out of range for {target}")]
    OutOfRange {
        /// Target Rust type.
        target: &'static str,
        /// Supplied integer.
        value: i64,
    },
}

impl ValueError {
    const fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::Mismatch {
            expected,
            found: found.kind(),
        }
    }
}

/// Strict conversion from a [`Value`].
pub trait FromValue: Sized {
    /// Converts `value`, rejecting any kind other than the one `Self` maps to.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] on kind mismatch or integer overflow.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

/// Infallible conversion into a [`Value`].
pub trait IntoValue {
    /// Converts `self`.
    fn into_value(self) -> Value;
}

impl FromValue for Value {
    fn from_value(value: Self) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Self {
        self
    }
}

impl Shaped for Value {
    fn shape() -> TypeShape {
        TypeShape::Any
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(()),
            other => Err(ValueError::mismatch("null", &other)),
        }
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl Shaped for () {
    fn shape() -> TypeShape {
        TypeShape::Unit
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(flag) => Ok(flag),
            other => Err(ValueError::mismatch("bool", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(float) => Ok(float),
            other => Err(ValueError::mismatch("float", &other)),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(text) => Ok(text),
            other => Err(ValueError::mismatch("string", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_owned())
    }
}

impl FromValue for OffsetDateTime {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Timestamp(at) => Ok(at),
            other => Err(ValueError::mismatch("timestamp", &other)),
        }
    }
}

impl IntoValue for OffsetDateTime {
    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

/// Implements [`Shaped`] as a named type for each listed type.
macro_rules! named_shape {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Shaped for $ty {
                fn shape() -> TypeShape {
                    TypeShape::named($name)
                }
            }
        )*
    };
}

named_shape!(
    bool => "bool",
    f64 => "f64",
    f32 => "f32",
    String => "String",
    OffsetDateTime => "OffsetDateTime",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    i128 => "i128",
    isize => "isize",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    u128 => "u128",
    usize => "usize",
);

/// Implements [`FromValue`] for integer types with range checking.
macro_rules! integer_from_value {
    ($($ty:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ValueError> {
                    match value {
                        Value::Int(int) => <$ty>::try_from(int).map_err(|_| {
                            ValueError::OutOfRange {
                                target: stringify!($ty),
                                value: int,
                            }
                        }),
                        other => Err(ValueError::mismatch("int", &other)),
                    }
                }
            }
        )*
    };
}

integer_from_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

/// Implements [`IntoValue`] for integer types that widen losslessly to `i64`.
macro_rules! integer_into_value {
    ($($ty:ident),* $(,)?) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Int(i64::from(self))
                }
            }
        )*
    };
}

integer_into_value!(i8, i16, i32, i64, u8, u16, u32);

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}

impl<T: Shaped> Shaped for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::Ref(Box::new(T::shape()))
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Seq(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(ValueError::mismatch("seq", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Seq(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: Shaped> Shaped for Vec<T> {
    fn shape() -> TypeShape {
        TypeShape::Seq(Box::new(T::shape()))
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, item)| T::from_value(item).map(|converted| (key, converted)))
                .collect(),
            other => Err(ValueError::mismatch("map", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(key, item)| (key, item.into_value()))
                .collect(),
        )
    }
}

impl<T: Shaped> Shaped for BTreeMap<String, T> {
    fn shape() -> TypeShape {
        TypeShape::Map(Box::new(String::shape()), Box::new(T::shape()))
    }
}

/// Converts a Rust tuple into positional call arguments.
///
/// # Example
///
/// ```
/// use tether_plugins::{IntoArgs, Value};
///
/// assert_eq!((5_i64, 3_i64).into_args(), vec![Value::Int(5), Value::Int(3)]);
/// ```
pub trait IntoArgs {
    /// Returns the positional argument list.
    fn into_args(self) -> Vec<Value>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Vec<Value> {
        self
    }
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Value> {
        Vec::new()
    }
}

/// Implements [`IntoArgs`] for a tuple of the given element names.
macro_rules! tuple_into_args {
    ($($name:ident),+) => {
        impl<$($name: IntoValue),+> IntoArgs for ($($name,)+) {
            #[expect(non_snake_case, reason = "tuple fields reuse the generic names")]
            fn into_args(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into_value()),+]
            }
        }
    };
}

tuple_into_args!(A);
tuple_into_args!(A, B);
tuple_into_args!(A, B, C);
tuple_into_args!(A, B, C, D);
tuple_into_args!(A, B, C, D, E);
tuple_into_args!(A, B, C, D, E, F);

#[cfg(test)]
mod tests;
