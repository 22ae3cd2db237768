use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::{DecodeError, EncodeError, Value, binary, text};
use crate::postgres::{Oid, PgFormat, oid};

/// Decode field bytes in given format.
pub type DecodeFn = fn(&[u8], PgFormat) -> Result<Value, DecodeError>;

/// Encode parameter value in given format.
pub type EncodeFn = fn(&Value, PgFormat, &mut BytesMut) -> Result<(), EncodeError>;

#[derive(Clone, Copy)]
struct Codec {
    format: PgFormat,
    decode: DecodeFn,
    encode: EncodeFn,
}

/// Runtime map of type oid to its preferred format and codec.
///
/// Oid that is not registered uses [`PgFormat::Text`], decodes text as
/// [`Value::Text`] and binary as [`Value::Bytea`].
///
/// The registry is shared read-only by a connection once it starts, register
/// types before passing it to [`ConnectionOptions`][crate::ConnectionOptions].
#[derive(Clone)]
pub struct TypeRegistry {
    types: HashMap<Oid, Codec>,
}

impl TypeRegistry {
    /// Create registry with builtin types.
    ///
    /// `bool`, `bytea`, `int2`, `int4`, `int8`, `oid`, `tid`, `xid` and `cid`
    /// prefer binary format, all other types prefer text.
    pub fn new() -> Self {
        use PgFormat::*;

        let mut me = Self::empty();
        me.register(oid::BOOL, Binary, decode_bool, encode_bool);
        me.register(oid::BYTEA, Binary, decode_bytea, encode_bytea);
        me.register(oid::INT8, Binary, decode_int8, encode_int8);
        me.register(oid::INT2, Binary, decode_int2, encode_int2);
        me.register(oid::INT4, Binary, decode_int4, encode_int4);
        me.register(oid::OID, Binary, decode_uint4, encode_uint4);
        me.register(oid::TID, Binary, decode_tid, encode_tid);
        me.register(oid::XID, Binary, decode_uint4, encode_uint4);
        me.register(oid::CID, Binary, decode_uint4, encode_uint4);
        me.register(oid::FLOAT4, Text, decode_float4, encode_float);
        me.register(oid::FLOAT8, Text, decode_float8, encode_float);
        for oid in [oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME, oid::CHAR, oid::UNKNOWN] {
            me.register(oid, Text, decode_fallback, encode_fallback);
        }
        me
    }

    /// Create registry without any type.
    pub fn empty() -> Self {
        Self { types: HashMap::new() }
    }

    /// Returns preferred format of given oid.
    pub fn format(&self, oid: Oid) -> PgFormat {
        self.types.get(&oid).map(|e| e.format).unwrap_or_default()
    }

    /// Add or change preferred format of an oid.
    ///
    /// Unregistered oid keeps the fallback codec.
    pub fn register_format(&mut self, oid: Oid, format: PgFormat) -> &mut Self {
        self.types
            .entry(oid)
            .and_modify(|e| e.format = format)
            .or_insert(Codec { format, decode: decode_fallback, encode: encode_fallback });
        self
    }

    /// Install a full codec for an oid, replacing any previous one.
    pub fn register(
        &mut self,
        oid: Oid,
        format: PgFormat,
        decode: DecodeFn,
        encode: EncodeFn,
    ) -> &mut Self {
        self.types.insert(oid, Codec { format, decode, encode });
        self
    }

    /// Decode field bytes, [`None`] is NULL.
    pub fn decode(&self, oid: Oid, format: PgFormat, bytes: Option<&[u8]>) -> Result<Value, DecodeError> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let decode = self.types.get(&oid).map(|e| e.decode).unwrap_or(decode_fallback);
        decode(bytes, format).map_err(|e| e.with_oid(oid))
    }

    /// Encode parameter value in the preferred format of `oid`.
    ///
    /// Returns the format used and the encoded bytes, [`None`] for NULL.
    pub fn encode(&self, oid: Oid, value: &Value) -> Result<(PgFormat, Option<Bytes>), EncodeError> {
        let codec = self.types.get(&oid).copied().unwrap_or(Codec {
            format: PgFormat::Text,
            decode: decode_fallback,
            encode: encode_fallback,
        });

        if value.is_null() {
            return Ok((codec.format, None));
        }

        let mut buf = BytesMut::new();
        (codec.encode)(value, codec.format, &mut buf).map_err(|e| e.with_oid(oid))?;
        Ok((codec.format, Some(buf.freeze())))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut oids = self.types.keys().collect::<Vec<_>>();
        oids.sort();
        f.debug_struct("TypeRegistry").field("oids", &oids).finish()
    }
}

// ===== Builtin codecs =====

macro_rules! decoder {
    ($name:ident, $variant:ident, $text:expr, $binary:expr) => {
        fn $name(bytes: &[u8], format: PgFormat) -> Result<Value, DecodeError> {
            match format {
                PgFormat::Text => $text(bytes).map(Value::$variant),
                PgFormat::Binary => $binary(bytes).map(Value::$variant),
            }
        }
    };
}

decoder!(decode_bool, Bool, text::bool, binary::bool);
decoder!(decode_bytea, Bytea, text::bytea, binary::bytea);
decoder!(decode_int2, Int2, text::number, binary::int2);
decoder!(decode_int4, Int4, text::number, binary::int4);
decoder!(decode_int8, Int8, text::number, binary::int8);
decoder!(decode_uint4, Oid, text::number, binary::uint4);
decoder!(decode_tid, Tid, text::tid, binary::tid);
decoder!(decode_float4, Float4, text::number, binary::float4);
decoder!(decode_float8, Float8, text::number, binary::float8);

fn decode_fallback(bytes: &[u8], format: PgFormat) -> Result<Value, DecodeError> {
    match format {
        PgFormat::Text => text::string(bytes).map(Value::Text),
        PgFormat::Binary => Ok(Value::Bytea(bytes.to_vec())),
    }
}

/// Raw text is passed as is in text format, the server parses it.
fn encode_raw_text(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (value, format) {
        (Value::Text(t), PgFormat::Text) => {
            buf.put_slice(t.as_bytes());
            Ok(())
        },
        _ => Err(EncodeError::new(value)),
    }
}

fn encode_bool(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (value, format) {
        (Value::Bool(b), PgFormat::Text) => buf.put_u8(if *b { b't' } else { b'f' }),
        (Value::Bool(b), PgFormat::Binary) => buf.put_u8(*b as u8),
        _ => return encode_raw_text(value, format, buf),
    }
    Ok(())
}

fn encode_bytea(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (value, format) {
        (Value::Bytea(b), PgFormat::Text) => text::encode_bytea(b, buf),
        (Value::Bytea(b), PgFormat::Binary) => buf.put_slice(b),
        (Value::Text(t), PgFormat::Binary) => buf.put_slice(t.as_bytes()),
        _ => return encode_raw_text(value, format, buf),
    }
    Ok(())
}

fn int_value(value: &Value) -> Option<i64> {
    match *value {
        Value::Int2(v) => Some(v.into()),
        Value::Int4(v) => Some(v.into()),
        Value::Int8(v) => Some(v),
        Value::Oid(v) => Some(v.into()),
        _ => None,
    }
}

fn encode_int2(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    encode_int_sized(value, format, buf, 2)
}

fn encode_int4(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    encode_int_sized(value, format, buf, 4)
}

fn encode_int8(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    encode_int_sized(value, format, buf, 8)
}

/// Any integer value is accepted as long as it fits the column width.
fn encode_int_sized(
    value: &Value,
    format: PgFormat,
    buf: &mut BytesMut,
    width: usize,
) -> Result<(), EncodeError> {
    let Some(int) = int_value(value) else {
        return encode_raw_text(value, format, buf);
    };
    match format {
        PgFormat::Text => buf.put_slice(itoa::Buffer::new().format(int).as_bytes()),
        PgFormat::Binary => {
            match width {
                2 => buf.put_i16(i16::try_from(int).map_err(|_| EncodeError::new(value))?),
                4 => buf.put_i32(i32::try_from(int).map_err(|_| EncodeError::new(value))?),
                _ => buf.put_i64(int),
            }
        },
    }
    Ok(())
}

fn encode_uint4(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let Some(int) = int_value(value) else {
        return encode_raw_text(value, format, buf);
    };
    let int = u32::try_from(int).map_err(|_| EncodeError::new(value))?;
    match format {
        PgFormat::Text => buf.put_slice(itoa::Buffer::new().format(int).as_bytes()),
        PgFormat::Binary => buf.put_u32(int),
    }
    Ok(())
}

fn encode_tid(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (value, format) {
        (Value::Tid(tid), PgFormat::Text) => {
            buf.put_slice(format!("({},{})", tid.block, tid.offset).as_bytes())
        },
        (Value::Tid(tid), PgFormat::Binary) => {
            buf.put_u32(tid.block);
            buf.put_u16(tid.offset);
        },
        _ => return encode_raw_text(value, format, buf),
    }
    Ok(())
}

fn float_literal(float: f64) -> String {
    if float.is_nan() {
        "NaN".into()
    } else if float == f64::INFINITY {
        "Infinity".into()
    } else if float == f64::NEG_INFINITY {
        "-Infinity".into()
    } else {
        float.to_string()
    }
}

fn encode_float(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match (value, format) {
        (Value::Float4(f), PgFormat::Text) => {
            let literal = if f.is_finite() { f.to_string() } else { float_literal((*f).into()) };
            buf.put_slice(literal.as_bytes())
        },
        (Value::Float8(f), PgFormat::Text) => buf.put_slice(float_literal(*f).as_bytes()),
        (Value::Float4(f), PgFormat::Binary) => buf.put_f32(*f),
        (Value::Float8(f), PgFormat::Binary) => buf.put_f64(*f),
        _ if int_value(value).is_some() => return encode_int_sized(value, PgFormat::Text, buf, 8),
        _ => return encode_raw_text(value, format, buf),
    }
    Ok(())
}

/// Any scalar is written with its text literal, bytes are written as is.
fn encode_fallback(value: &Value, format: PgFormat, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match value {
        Value::Null => return Err(EncodeError::new(value)),
        Value::Text(t) => buf.put_slice(t.as_bytes()),
        Value::Bytea(b) if format == PgFormat::Binary => buf.put_slice(b),
        Value::Bytea(b) => text::encode_bytea(b, buf),
        Value::Bool(b) => buf.put_slice(if *b { b"t" } else { b"f" }),
        Value::Float4(f) => buf.put_slice(float_literal((*f).into()).as_bytes()),
        Value::Float8(f) => buf.put_slice(float_literal(*f).as_bytes()),
        Value::Tid(tid) => buf.put_slice(format!("({},{})", tid.block, tid.offset).as_bytes()),
        Value::Int2(_) | Value::Int4(_) | Value::Int8(_) | Value::Oid(_) => {
            return encode_int_sized(value, PgFormat::Text, buf, 8);
        },
    }
    Ok(())
}
