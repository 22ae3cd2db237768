//! Messages sent by the client.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, Bytes, BytesMut};

use super::{Oid, PgFormat};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// Append a framed message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    const PREFIX: usize = 1 + 4;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size_hint);

    msg.encode(&mut *buf);

    debug_assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Frontend message body size not equal to size hint"
    );
}

/// Message with a type byte, written by [`write`].
pub trait FrontendProtocol {
    const MSGTYPE: u8;

    /// Size of the main body, excluding message type and length.
    fn size_hint(&self) -> u32;

    /// Write the body, exactly [`size_hint`][FrontendProtocol::size_hint] bytes.
    fn encode(self, buf: impl BufMut);
}

/// First message of a connection.
///
/// It has no type byte, so it is written by itself instead of [`write`].
#[derive(Debug)]
pub struct Startup<'a> {
    pub user: &'a str,
    /// Server uses the user name when omitted.
    pub database: Option<&'a str>,
    /// Run-time parameters applied at backend start, e.g. `client_encoding`.
    pub params: &'a [(String, String)],
}

impl Startup<'_> {
    /// The protocol version number, major 3 minor 0.
    pub const PROTOCOL_VERSION: u32 = 196_608;

    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // length, patched below
        buf.put_u32(0);
        buf.put_u32(Self::PROTOCOL_VERSION);

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        for (key, value) in self.params {
            buf.put_nul_string(key);
            buf.put_nul_string(value);
        }

        buf.put_u8(b'\0');

        let mut written_buf = &mut buf[offset..];
        let len = written_buf.len().to_u32();
        written_buf.put_u32(len);
    }
}

/// `p`
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// Plain or md5 hashed, depending on the request.
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// `Q`, simple query, may contain several statements.
#[derive(Debug)]
pub struct Query<'a> {
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// `P`
#[derive(Debug)]
pub struct Parse<'a> {
    /// Empty for the unnamed statement.
    pub prepare_name: &'a str,
    pub sql: &'a str,
    /// Parameter types, `0` lets the server infer it.
    pub oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + 4 * self.oids.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids.len().to_u16());
        for oid in self.oids {
            buf.put_u32(*oid);
        }
    }
}

/// `S`, ends an extended query step, server replies with `ReadyForQuery`.
#[derive(Debug)]
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// `X`
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// `B`
#[derive(Debug)]
pub struct Bind<'a> {
    pub portal_name: &'a str,
    pub stmt_name: &'a str,
    /// One per parameter.
    pub param_formats: &'a [PgFormat],
    /// [`None`] is sent as NULL.
    pub params: &'a [Option<Bytes>],
    /// Empty requests text for every column.
    pub result_formats: &'a [PgFormat],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        let params = self
            .params
            .iter()
            .map(|e| 4 + e.as_ref().map(|e| e.len().to_u32()).unwrap_or_default())
            .sum::<u32>();

        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            + 2 + 2 * self.param_formats.len().to_u32()
            + 2 + params
            + 2 + 2 * self.result_formats.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(self.param_formats.len().to_u16());
        for format in self.param_formats {
            buf.put_u16(format.format_code());
        }

        buf.put_u16(self.params.len().to_u16());
        for param in self.params {
            match param {
                Some(value) => {
                    buf.put_i32(value.len().to_u32() as i32);
                    buf.put_slice(value);
                },
                // -1 for NULL, no value bytes follow
                None => buf.put_i32(-1),
            }
        }

        buf.put_u16(self.result_formats.len().to_u16());
        for format in self.result_formats {
            buf.put_u16(format.format_code());
        }
    }
}

/// `E`
#[derive(Debug)]
pub struct Execute<'a> {
    pub portal_name: &'a str,
    /// `0` for no limit.
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
    }
}

/// `D`
#[derive(Debug)]
pub struct Describe<'a> {
    /// `S` for statement, `P` for portal.
    pub kind: u8,
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}
