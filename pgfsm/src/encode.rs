//! Prepared statement parameters.
use bytes::Bytes;

use crate::{
    postgres::{Oid, PgFormat, PgType},
    value::{EncodeError, TypeRegistry, Value},
};

/// Ordered parameters of a prepared statement.
///
/// Each parameter carries its type oid, the oid sequence is part of the
/// statement signature.
///
/// ```
/// use pgfsm::{Params, Value};
///
/// let params = Params::new()
///     .bind(420)
///     .bind("Foo")
///     .bind(None::<i64>);
///
/// assert_eq!(params.types(), &[23, 25, 20]);
/// assert_eq!(params.values()[2], Value::Null);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    types: Vec<Oid>,
    values: Vec<Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, its oid is taken from [`PgType`].
    pub fn bind<T: PgType + Into<Value>>(self, value: T) -> Self {
        self.bind_typed(T::OID, value)
    }

    /// Bind a value with explicit oid.
    ///
    /// Oid `0` lets the server infer the type, the value is then sent as text.
    pub fn bind_typed(mut self, oid: Oid, value: impl Into<Value>) -> Self {
        self.types.push(oid);
        self.values.push(value.into());
        self
    }

    /// Bind NULL with explicit oid.
    pub fn bind_null(self, oid: Oid) -> Self {
        self.bind_typed(oid, Value::Null)
    }

    /// Parameter type oids, in order.
    pub fn types(&self) -> &[Oid] {
        &self.types
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Encode every value in the preferred format of its oid.
    ///
    /// `Parse` and `Bind` carry the parameter count as 16 bit integer.
    pub(crate) fn encode(&self, registry: &TypeRegistry) -> Result<EncodedParams, EncodeError> {
        if u16::try_from(self.len()).is_err() {
            return Err(EncodeError::too_many_params(self.len()));
        }

        let mut formats = Vec::with_capacity(self.len());
        let mut values = Vec::with_capacity(self.len());

        for (oid, value) in self.types.iter().zip(&self.values) {
            let (format, bytes) = registry.encode(*oid, value)?;
            formats.push(format);
            values.push(bytes);
        }

        Ok(EncodedParams { formats, values })
    }
}

/// Parameters ready to be written in a `Bind` message.
#[derive(Debug, Default)]
pub(crate) struct EncodedParams {
    pub formats: Vec<PgFormat>,
    pub values: Vec<Option<Bytes>>,
}
