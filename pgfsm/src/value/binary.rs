//! Binary format representation.
//!
//! Integers use network byte order.
use super::{DecodeError, Tid};

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| {
        DecodeError::conversion(format!("expected {N} bytes binary value, found {}", bytes.len()))
    })
}

pub fn bool(bytes: &[u8]) -> Result<bool, DecodeError> {
    let [b] = fixed::<1>(bytes)?;
    Ok(b != 0)
}

/// Binary `bytea` is the raw bytes.
pub fn bytea(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(bytes.to_vec())
}

pub fn int2(bytes: &[u8]) -> Result<i16, DecodeError> {
    fixed(bytes).map(i16::from_be_bytes)
}

pub fn int4(bytes: &[u8]) -> Result<i32, DecodeError> {
    fixed(bytes).map(i32::from_be_bytes)
}

pub fn int8(bytes: &[u8]) -> Result<i64, DecodeError> {
    fixed(bytes).map(i64::from_be_bytes)
}

pub fn uint4(bytes: &[u8]) -> Result<u32, DecodeError> {
    fixed(bytes).map(u32::from_be_bytes)
}

pub fn float4(bytes: &[u8]) -> Result<f32, DecodeError> {
    fixed(bytes).map(f32::from_be_bytes)
}

pub fn float8(bytes: &[u8]) -> Result<f64, DecodeError> {
    fixed(bytes).map(f64::from_be_bytes)
}

/// Block number then offset.
pub fn tid(bytes: &[u8]) -> Result<Tid, DecodeError> {
    let b = fixed::<6>(bytes)?;
    Ok(Tid {
        block: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        offset: u16::from_be_bytes([b[4], b[5]]),
    })
}
