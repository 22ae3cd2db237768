//! Field value decoding and encoding.
//!
//! - [`Value`]
//! - [`TypeRegistry`]
//! - [`FromValue`]
//! - [`DecodeError`]
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use crate::postgres::Oid;

mod registry;
pub mod text;
pub mod binary;

pub use registry::{DecodeFn, EncodeFn, TypeRegistry};

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    /// `oid`, `xid` and `cid`, all unsigned four-byte integer.
    Oid(u32),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Tid(Tid),
}

/// Physical location of a row version within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tid {
    pub block: u32,
    pub offset: u16,
}

impl Value {
    /// Returns `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Oid(_) => "oid",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Tid(_) => "tid",
        }
    }
}

macro_rules! into_value {
    ($($ty:ty => $pat:pat => $body:expr),* $(,)?) => {$(
        impl From<$ty> for Value {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    )*};
}

into_value! {
    bool => v => Value::Bool(v),
    i16 => v => Value::Int2(v),
    i32 => v => Value::Int4(v),
    i64 => v => Value::Int8(v),
    u32 => v => Value::Oid(v),
    f32 => v => Value::Float4(v),
    f64 => v => Value::Float8(v),
    String => v => Value::Text(v),
    &str => v => Value::Text(v.to_owned()),
    Vec<u8> => v => Value::Bytea(v),
    &[u8] => v => Value::Bytea(v.to_vec()),
    Tid => v => Value::Tid(v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value::Null,
        }
    }
}

/// A type that can be extracted from decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, DecodeError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }
}

macro_rules! from_value {
    ($ty:ty, $name:literal, $($pat:pat => $body:expr),*) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, DecodeError> {
                match value {
                    $($pat => Ok($body),)*
                    Value::Null => Err(DecodeError::Null),
                    value => Err(DecodeError::mismatch($name, value.kind())),
                }
            }
        }
    };
}

from_value!(bool, "bool", Value::Bool(v) => v);
from_value!(i16, "i16", Value::Int2(v) => v);
from_value!(i32, "i32", Value::Int2(v) => v.into(), Value::Int4(v) => v);
from_value!(i64, "i64", Value::Int2(v) => v.into(), Value::Int4(v) => v.into(), Value::Int8(v) => v);
from_value!(u32, "u32", Value::Oid(v) => v);
from_value!(f32, "f32", Value::Float4(v) => v);
from_value!(f64, "f64", Value::Float4(v) => v.into(), Value::Float8(v) => v);
from_value!(String, "String", Value::Text(v) => v);
from_value!(Vec<u8>, "Vec<u8>", Value::Bytea(v) => v, Value::Text(v) => v.into_bytes());
from_value!(Tid, "Tid", Value::Tid(v) => v);

/// An error when decoding field value.
pub enum DecodeError {
    /// Field bytes cannot be converted to the requested type.
    Conversion {
        oid: Option<Oid>,
        reason: Cow<'static, str>,
    },
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Index requested is out of bounds.
    OutOfRange {
        index: usize,
        len: usize,
    },
    /// Field is null.
    Null,
}

impl DecodeError {
    pub(crate) fn conversion(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Conversion { oid: None, reason: reason.into() }
    }

    pub(crate) fn mismatch(expect: &'static str, found: &'static str) -> Self {
        Self::conversion(format!("cannot convert `{found}` into `{expect}`"))
    }

    pub(crate) fn with_oid(self, oid: Oid) -> Self {
        match self {
            Self::Conversion { oid: None, reason } => Self::Conversion { oid: Some(oid), reason },
            me => me,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Conversion { oid: Some(oid), reason } => write!(f, "{reason} (oid {oid})"),
            Self::Conversion { oid: None, reason } => f.write_str(reason),
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::OutOfRange { index, len } => write!(f, "index {index} out of range for length {len}"),
            Self::Null => f.write_str("unexpected NULL value"),
        }
    }
}

impl From<Utf8Error> for DecodeError {
    fn from(e: Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

impl From<FromUtf8Error> for DecodeError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Utf8(e.utf8_error())
    }
}

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// An error when encoding parameter value.
pub struct EncodeError {
    repr: EncodeRepr,
}

enum EncodeRepr {
    Mismatch { oid: Oid, kind: &'static str },
    /// More than a `Bind` message can carry.
    TooManyParams(usize),
}

impl EncodeError {
    /// Value cannot be represented by the target type.
    pub fn new(value: &Value) -> Self {
        Self { repr: EncodeRepr::Mismatch { oid: 0, kind: value.kind() } }
    }

    pub(crate) fn too_many_params(len: usize) -> Self {
        Self { repr: EncodeRepr::TooManyParams(len) }
    }

    pub(crate) fn with_oid(mut self, oid: Oid) -> Self {
        if let EncodeRepr::Mismatch { oid: target, .. } = &mut self.repr {
            *target = oid;
        }
        self
    }
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            EncodeRepr::Mismatch { oid, kind } => write!(f, "failed to encode `{kind}` value as oid {oid}"),
            EncodeRepr::TooManyParams(len) => {
                write!(f, "{len} parameters exceed the protocol limit of {}", u16::MAX)
            },
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
