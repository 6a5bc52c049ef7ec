//! Typed extraction of bound arguments.
//!
//! [`FromArg`] maps one slot onto a Rust type and declares the [`ParamKind`]
//! the binder should use for it. [`FromArgs`] does the same for a whole
//! argument tuple, which is what handler closures receive.

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{ArgValue, BoundArgs, ParamKind};
use crate::codec::JsonCodec;
use crate::error::{Result, RpcError};
use crate::result::Json;

/// A single handler argument.
pub trait FromArg: Sized + Send + 'static {
    /// Kind the binder converts this argument as.
    fn kind() -> ParamKind;

    /// Build the argument from its bound slot.
    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self>;
}

/// An enumeration bound by case-insensitive symbolic name.
///
/// ```
/// use queuerpc::binder::SymbolicEnum;
///
/// #[derive(Debug, PartialEq)]
/// enum Priority { Low, High }
///
/// impl SymbolicEnum for Priority {
///     const VARIANTS: &'static [&'static str] = &["Low", "High"];
///
///     fn from_index(index: usize) -> Option<Self> {
///         [Priority::Low, Priority::High].into_iter().nth(index)
///     }
/// }
/// ```
pub trait SymbolicEnum: Sized + Send + 'static {
    /// Variant names, in index order.
    const VARIANTS: &'static [&'static str];

    fn from_index(index: usize) -> Option<Self>;
}

/// Handler argument wrapper for [`SymbolicEnum`] types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enum<E>(pub E);

impl<E> Enum<E> {
    pub fn into_inner(self) -> E {
        self.0
    }
}

fn required(name: &str, value: Option<ArgValue>) -> Result<ArgValue> {
    value.ok_or_else(|| RpcError::MissingArgument(name.to_string()))
}

fn mismatch(name: &str, expected: &str, got: &ArgValue) -> RpcError {
    RpcError::binding(name, format!("expected {}, got {:?}", expected, got))
}

macro_rules! int_arg {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FromArg for $ty {
                fn kind() -> ParamKind {
                    ParamKind::$kind
                }

                fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
                    match required(name, value)? {
                        ArgValue::Int(v) => {
                            <$ty>::try_from(v).map_err(|e| RpcError::binding(name, e))
                        }
                        ArgValue::UInt(v) => {
                            <$ty>::try_from(v).map_err(|e| RpcError::binding(name, e))
                        }
                        other => Err(mismatch(name, stringify!($ty), &other)),
                    }
                }
            }
        )*
    };
}

int_arg!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

impl FromArg for f64 {
    fn kind() -> ParamKind {
        ParamKind::F64
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Float(v) => Ok(v),
            other => Err(mismatch(name, "f64", &other)),
        }
    }
}

impl FromArg for f32 {
    fn kind() -> ParamKind {
        ParamKind::F32
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Float(v) => Ok(v as f32),
            other => Err(mismatch(name, "f32", &other)),
        }
    }
}

impl FromArg for bool {
    fn kind() -> ParamKind {
        ParamKind::Bool
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Bool(v) => Ok(v),
            other => Err(mismatch(name, "bool", &other)),
        }
    }
}

impl FromArg for char {
    fn kind() -> ParamKind {
        ParamKind::Char
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Char(v) => Ok(v),
            other => Err(mismatch(name, "char", &other)),
        }
    }
}

impl FromArg for String {
    fn kind() -> ParamKind {
        ParamKind::String
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::String(v) => Ok(v),
            other => Err(mismatch(name, "string", &other)),
        }
    }
}

impl FromArg for DateTime<FixedOffset> {
    fn kind() -> ParamKind {
        ParamKind::DateTime
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::DateTime(v) => Ok(v),
            other => Err(mismatch(name, "date/time", &other)),
        }
    }
}

impl FromArg for DateTime<Utc> {
    fn kind() -> ParamKind {
        ParamKind::DateTime
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        DateTime::<FixedOffset>::from_arg(name, value).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromArg for Uuid {
    fn kind() -> ParamKind {
        ParamKind::Uuid
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Uuid(v) => Ok(v),
            other => Err(mismatch(name, "uuid", &other)),
        }
    }
}

impl<E: SymbolicEnum> FromArg for Enum<E> {
    fn kind() -> ParamKind {
        ParamKind::Enum(E::VARIANTS)
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Enum(index) => E::from_index(index)
                .map(Enum)
                .ok_or_else(|| {
                    RpcError::binding(name, format!("no variant at index {}", index))
                }),
            other => Err(mismatch(name, "enum", &other)),
        }
    }
}

impl<T> FromArg for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn kind() -> ParamKind {
        ParamKind::Composite
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match required(name, value)? {
            ArgValue::Composite(v) => JsonCodec::from_value(v)
                .map(Json)
                .map_err(|e| RpcError::binding(name, e)),
            other => Err(mismatch(name, "JSON body", &other)),
        }
    }
}

impl<T: FromArg> FromArg for Option<T> {
    fn kind() -> ParamKind {
        T::kind()
    }

    fn from_arg(name: &str, value: Option<ArgValue>) -> Result<Self> {
        match value {
            Some(v) => T::from_arg(name, Some(v)).map(Some),
            None => Ok(None),
        }
    }
}

/// The full argument list of a handler.
///
/// Implemented for `()` and tuples of up to eight [`FromArg`] types.
pub trait FromArgs: Sized + Send + 'static {
    /// Kinds of every parameter, in order.
    fn kinds() -> Vec<ParamKind>;

    /// Build the argument tuple from bound slots.
    fn from_args(args: BoundArgs) -> Result<Self>;
}

impl FromArgs for () {
    fn kinds() -> Vec<ParamKind> {
        Vec::new()
    }

    fn from_args(_args: BoundArgs) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_args {
    ($($ty:ident),+) => {
        impl<$($ty: FromArg),+> FromArgs for ($($ty,)+) {
            fn kinds() -> Vec<ParamKind> {
                vec![$($ty::kind()),+]
            }

            fn from_args(args: BoundArgs) -> Result<Self> {
                let declared = args.len();
                let mut slots = args.into_iter();
                Ok(($(
                    {
                        let slot = slots.next().ok_or_else(|| {
                            RpcError::InvalidConfiguration(format!(
                                "{} parameters bound but handler takes more",
                                declared
                            ))
                        })?;
                        $ty::from_arg(&slot.name, slot.value)?
                    },
                )+))
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);
tuple_args!(A, B, C, D, E, F, G);
tuple_args!(A, B, C, D, E, F, G, H);
