//! Text format representation.
//!
//! In the text format there is no trailing null character, values are in
//! the same representation as the server `output` function.
use std::str::FromStr;

use super::{DecodeError, Tid};

const TRUE_LITERALS: [&[u8]; 7] = [b"TRUE", b"true", b"t", b"y", b"yes", b"on", b"1"];
const FALSE_LITERALS: [&[u8]; 7] = [b"FALSE", b"false", b"f", b"n", b"no", b"off", b"0"];

/// Decode boolean literal.
///
/// Only the exact spelling accepted by the server is recognized, anything
/// else is an error instead of defaulting to `false`.
pub fn bool(bytes: &[u8]) -> Result<bool, DecodeError> {
    if TRUE_LITERALS.contains(&bytes) {
        return Ok(true);
    }
    if FALSE_LITERALS.contains(&bytes) {
        return Ok(false);
    }
    Err(DecodeError::conversion(format!(
        "invalid boolean literal {:?}",
        String::from_utf8_lossy(bytes)
    )))
}

pub fn string(bytes: &[u8]) -> Result<String, DecodeError> {
    Ok(std::str::from_utf8(bytes)?.to_owned())
}

/// Decode number with its [`FromStr`] implementation.
pub fn number<T: FromStr>(bytes: &[u8]) -> Result<T, DecodeError> {
    let s = std::str::from_utf8(bytes)?;
    s.parse().map_err(|_| {
        DecodeError::conversion(format!("invalid {} literal {s:?}", std::any::type_name::<T>()))
    })
}

/// Decode `(block,offset)`.
pub fn tid(bytes: &[u8]) -> Result<Tid, DecodeError> {
    let s = std::str::from_utf8(bytes)?;
    let invalid = || DecodeError::conversion(format!("invalid tid literal {s:?}"));

    let inner = s
        .strip_prefix('(')
        .and_then(|e| e.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let (block, offset) = inner.split_once(',').ok_or_else(invalid)?;

    Ok(Tid {
        block: block.trim().parse().map_err(|_| invalid())?,
        offset: offset.trim().parse().map_err(|_| invalid())?,
    })
}

/// Decode `bytea` in either hex or escape format.
///
/// <https://www.postgresql.org/docs/current/datatype-binary.html>
pub fn bytea(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    match bytes {
        [b'\\', b'x', hex @ ..] => bytea_hex(hex),
        escaped => bytea_escape(escaped),
    }
}

fn bytea_hex(hex: &[u8]) -> Result<Vec<u8>, DecodeError> {
    fn digit(b: u8) -> Result<u8, DecodeError> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(DecodeError::conversion(format!("invalid hex digit {:?}", b as char))),
        }
    }

    // whitespace is allowed between digit pairs
    let digits = hex.iter().copied().filter(|e| !e.is_ascii_whitespace()).collect::<Vec<_>>();
    if digits.len() % 2 != 0 {
        return Err(DecodeError::conversion("odd number of hex digits in bytea"));
    }

    digits
        .chunks_exact(2)
        .map(|pair| Ok(digit(pair[0])? << 4 | digit(pair[1])?))
        .collect()
}

fn bytea_escape(mut input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut output = Vec::with_capacity(input.len());

    loop {
        match input {
            [] => break,
            [b'\\', b'\\', rest @ ..] => {
                output.push(b'\\');
                input = rest;
            },
            [b'\\', a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', rest @ ..] => {
                output.push((a - b'0') << 6 | (b - b'0') << 3 | (c - b'0'));
                input = rest;
            },
            [b'\\', ..] => {
                return Err(DecodeError::conversion("invalid escape sequence in bytea"));
            },
            [b, rest @ ..] => {
                output.push(*b);
                input = rest;
            },
        }
    }

    Ok(output)
}

/// Encode `bytea` in hex format.
pub fn encode_bytea(bytes: &[u8], buf: &mut impl bytes::BufMut) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    buf.put_slice(b"\\x");
    for b in bytes {
        buf.put_u8(HEX[(b >> 4) as usize]);
        buf.put_u8(HEX[(b & 0xf) as usize]);
    }
}
