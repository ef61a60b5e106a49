//! Adapters from typed Rust functions to positional RPC handlers.
//!
//! A function registered in a [`MethodTable`](super::MethodTable) has its
//! parameter and return types checked at compile time through [`FromValue`],
//! [`IntoValue`], and [`Shaped`]. At run time each call verifies the arity,
//! converts the positional arguments, and maps the outcome into a
//! [`CallError`] where appropriate.

use std::fmt;

use crate::abi::{Shaped, TypeShape};
use crate::protocol::CallError;
use crate::value::{FromValue, IntoValue, Value};

/// A function whose error return is reported as a `remote` failure.
pub trait FallibleMethod<Args>: Send + Sync + 'static {
    /// Parameter shapes in positional order.
    fn params() -> Vec<TypeShape>;

    /// Shape of the success value.
    fn returns() -> TypeShape;

    /// Invokes the function with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns `bad_arguments` on arity or conversion failure and `remote`
    /// when the function itself fails.
    fn call(&self, args: Vec<Value>) -> Result<Value, CallError>;
}

/// A function that always produces a value.
pub trait InfallibleMethod<Args>: Send + Sync + 'static {
    /// Parameter shapes in positional order.
    fn params() -> Vec<TypeShape>;

    /// Shape of the returned value.
    fn returns() -> TypeShape;

    /// Invokes the function with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns `bad_arguments` on arity or conversion failure.
    fn call(&self, args: Vec<Value>) -> Result<Value, CallError>;
}

fn arity_error(expected: usize, found: usize) -> CallError {
    let noun = if expected == 1 { "argument" } else { "arguments" };
    CallError::bad_arguments(format!("expected {expected} {noun}, got {found}"))
}

fn argument<T: FromValue>(value: Value, position: usize) -> Result<T, CallError> {
    T::from_value(value)
        .map_err(|err| CallError::bad_arguments(format!("argument {position}: {err}")))
}

macro_rules! count {
    () => { 0_usize };
    ($head:ident $($tail:ident)*) => { 1_usize + count!($($tail)*) };
}

/// Implements both method traits for one arity.
///
/// Each entry is `(position, Type, raw_binding, converted_binding)`.
macro_rules! method_arity {
    ($(($pos:literal, $ty:ident, $raw:ident, $arg:ident)),*) => {
        impl<Func, Ret, Fail, $($ty,)*> FallibleMethod<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Result<Ret, Fail> + Send + Sync + 'static,
            Ret: IntoValue + Shaped,
            Fail: fmt::Display,
            $($ty: FromValue + Shaped,)*
        {
            fn params() -> Vec<TypeShape> {
                vec![$(<$ty as Shaped>::shape()),*]
            }

            fn returns() -> TypeShape {
                Ret::shape()
            }

            fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
                let [$($raw),*] = <[Value; count!($($ty)*)]>::try_from(args)
                    .map_err(|rejected| arity_error(count!($($ty)*), rejected.len()))?;
                $(let $arg = argument::<$ty>($raw, $pos)?;)*
                self($($arg),*)
                    .map(IntoValue::into_value)
                    .map_err(|err| CallError::remote(err.to_string()))
            }
        }

        impl<Func, Ret, $($ty,)*> InfallibleMethod<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
            Ret: IntoValue + Shaped,
            $($ty: FromValue + Shaped,)*
        {
            fn params() -> Vec<TypeShape> {
                vec![$(<$ty as Shaped>::shape()),*]
            }

            fn returns() -> TypeShape {
                Ret::shape()
            }

            fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
                let [$($raw),*] = <[Value; count!($($ty)*)]>::try_from(args)
                    .map_err(|rejected| arity_error(count!($($ty)*), rejected.len()))?;
                $(let $arg = argument::<$ty>($raw, $pos)?;)*
                Ok(self($($arg),*).into_value())
            }
        }
    };
}

method_arity!();
method_arity!((1, A, raw_a, a));
method_arity!((1, A, raw_a, a), (2, B, raw_b, b));
method_arity!((1, A, raw_a, a), (2, B, raw_b, b), (3, C, raw_c, c));
method_arity!(
    (1, A, raw_a, a),
    (2, B, raw_b, b),
    (3, C, raw_c, c),
    (4, D, raw_d, d)
);
method_arity!(
    (1, A, raw_a, a),
    (2, B, raw_b, b),
    (3, C, raw_c, c),
    (4, D, raw_d, d),
    (5, E, raw_e, e)
);
