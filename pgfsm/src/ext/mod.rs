//! Extension traits over `bytes` buffers.
use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Length conversion for message fields.
pub trait UsizeExt {
    /// Panics if the length does not fit, a message that large is a bug.
    fn to_u32(self) -> u32;
    /// Panics if the length does not fit.
    fn to_u16(self) -> u16;
}

/// Size of a nul terminated string on the wire.
pub trait StrExt {
    fn nul_string_len(&self) -> u32;
}

/// Write nul terminated strings.
pub trait BufMutExt {
    fn put_nul_string(&mut self, string: &str);
}

/// Bounds checked read from a message body.
///
/// Every backend message is decoded through these, a short body yields
/// [`ProtocolError`] instead of a panic from [`Buf`].
pub trait BytesExt {
    /// Read nul terminated bytes, excluding the nul.
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError>;

    /// Read nul terminated utf8 string.
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;

    /// Split exactly `len` bytes.
    fn take_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError>;

    fn take_u8(&mut self) -> Result<u8, ProtocolError>;
    fn take_u16(&mut self) -> Result<u16, ProtocolError>;
    fn take_i16(&mut self) -> Result<i16, ProtocolError>;
    fn take_u32(&mut self) -> Result<u32, ProtocolError>;
    fn take_i32(&mut self) -> Result<i32, ProtocolError>;
}

/// Print bytes for logs and debug output.
pub trait FmtExt {
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Ascii is printed as is, other bytes are escaped.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        match u32::try_from(self) {
            Ok(ok) => ok,
            Err(_) => panic!("message size too large for protocol: {self}"),
        }
    }

    fn to_u16(self) -> u16 {
        match u16::try_from(self) {
            Ok(ok) => ok,
            Err(_) => panic!("message size too large for protocol: {self}"),
        }
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

macro_rules! take {
    ($name:ident, $get:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty, ProtocolError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(ProtocolError::malformed(concat!("body too short for ", stringify!($ty))));
            }
            Ok(self.$get())
        }
    };
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::malformed("string is not nul terminated"));
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let bytes = self.get_nul_bytes()?;
        ByteStr::from_utf8(bytes).map_err(ProtocolError::Utf8)
    }

    fn take_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if self.len() < len {
            return Err(ProtocolError::malformed("body shorter than declared length"));
        }
        Ok(self.split_to(len))
    }

    take!(take_u8, get_u8, u8);
    take!(take_u16, get_u16, u16);
    take!(take_i16, get_i16, i16);
    take!(take_u32, get_u32, u32);
    take!(take_i32, get_i32, i32);
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
