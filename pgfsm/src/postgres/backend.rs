//! Messages sent by the server.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::Bytes;

use super::{Message, Oid, ProtocolError};
use crate::{common::ByteStr, ext::BytesExt};

/// Decode message body of a specific message type.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Every server message the connection understands.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
    /// Message type this client does not handle, e.g. `NotificationResponse`.
    Unknown(Message),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                    Self::Unknown(msg) => msg.msgtype,
                }
            }

            /// Message name for logging, `"Unknown"` if not handled.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            /// Decode a framed message.
            pub fn decode(message: Message) -> Result<Self, ProtocolError> {
                let Message { msgtype, body } = message;
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => Self::Unknown(Message { msgtype, body }),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

/// `R`, authentication step.
#[derive(Debug)]
pub enum Authentication {
    /// Handshake accepted.
    Ok,
    KerberosV5,
    /// Send password as is.
    CleartextPassword,
    /// Send md5 hashed password.
    MD5Password {
        salt: [u8;4],
    },
    GSS,
    GSSContinue {
        data: Bytes,
    },
    SSPI,
    /// SASL mechanism negotiation, not implemented.
    SASL {
        /// Nul terminated mechanism names.
        mechanisms: Bytes,
    },
    SASLContinue {
        data: Bytes,
    },
    SASLFinal {
        data: Bytes,
    },
    /// Authentication code not defined by the protocol.
    Other {
        code: u32,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Name of the requested method, for error reporting.
    pub fn method_name(&self) -> &'static str {
        match self {
            Authentication::Ok => "ok",
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::CleartextPassword => "cleartext password",
            Authentication::MD5Password { .. } => "md5 password",
            Authentication::GSS | Authentication::GSSContinue { .. } => "GSS",
            Authentication::SSPI => "SSPI",
            Authentication::SASL { .. }
            | Authentication::SASLContinue { .. }
            | Authentication::SASLFinal { .. } => "SASL",
            Authentication::Other { .. } => "unknown",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match body.take_u32()? {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => Authentication::MD5Password { salt: body.take_u32()?.to_be_bytes(), },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => Authentication::SASL { mechanisms: body },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            code => Authentication::Other { code },
        };
        Ok(auth)
    }
}

/// `K`, key used to cancel a running query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.take_u32()?,
            secret_key: body.take_u32()?,
        })
    }
}

/// `S`, server parameter report, e.g. `server_version` or `TimeZone`.
#[derive(Debug)]
pub struct ParameterStatus {
    pub name: ByteStr,
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// `N`, non fatal message with the same fields as [`ErrorResponse`].
#[derive(Debug)]
pub struct NoticeResponse {
    pub body: Bytes
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { body })
    }
}

/// `E`, body is kept as is, read it with [`QueryError::parse`][super::QueryError::parse].
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// `T`
#[derive(Debug)]
pub struct RowDescription {
    pub field_len: u16,
    /// Undecoded field descriptions.
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            field_len: body.take_u16()?,
            body,
        })
    }
}

/// `D`
#[derive(Debug)]
pub struct DataRow {
    pub column_len: u16,
    /// Undecoded column values.
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            column_len: body.take_u16()?,
            body,
        })
    }
}

/// `C`, one statement finished.
///
/// The tag is `INSERT oid rows` for insert, `<COMMAND> rows` for statements
/// that count rows, or only the command name.
#[derive(Debug)]
pub struct CommandComplete {
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: body.get_nul_bytestr()?,
        })
    }
}

/// `v`, server does not support the requested minor version or options.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    pub minor: u32,
    pub len: u32,
    /// Names of the unrecognized options.
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            minor: body.take_u32()?,
            len: body.take_u32()?,
            opt_names: body,
        })
    }
}

/// `t`
#[derive(Debug)]
pub struct ParameterDescription {
    /// Object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.take_u16()?;
        let oids = (0..len).map(|_| body.take_u32()).collect::<Result<_, _>>()?;
        Ok(Self { oids })
    }
}

/// `Z`, end of a query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// `I` outside transaction, `T` inside, `E` inside a failed one.
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tx_status: body.take_u8()? })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    assert_msgtype!(msgtype);
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    struct BindComplete, b'2';

    struct CloseComplete, b'3';

    /// Sent instead of `CommandComplete` for empty sql.
    struct EmptyQueryResponse, b'I';

    /// Described statement returns no rows.
    struct NoData, b'n';

    struct ParseComplete, b'1';

    /// Row limit of `Execute` reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_request() {
        let msg = Message::new(b'R', &[0, 0, 0, 5, 0x2a, 0x3d, 0x8f, 0xe0][..]);
        match BackendMessage::decode(msg).unwrap() {
            BackendMessage::Authentication(Authentication::MD5Password { salt }) => {
                assert_eq!(salt, [0x2a, 0x3d, 0x8f, 0xe0]);
            },
            msg => panic!("unexpected {msg:?}"),
        }
    }

    #[test]
    fn truncated_md5_request() {
        let msg = Message::new(b'R', &[0, 0, 0, 5, 0x2a][..]);
        assert!(BackendMessage::decode(msg).is_err());
    }

    #[test]
    fn unknown_is_kept() {
        let msg = Message::new(b'A', &b"payload"[..]);
        let decoded = BackendMessage::decode(msg.clone()).unwrap();
        assert_eq!(decoded.msgtype(), b'A');
        assert!(matches!(decoded, BackendMessage::Unknown(m) if m == msg));
    }

    #[test]
    fn command_complete() {
        let msg = Message::new(b'C', &b"INSERT 0 3\0"[..]);
        let BackendMessage::CommandComplete(cmd) = BackendMessage::decode(msg).unwrap() else {
            panic!("not a command complete")
        };
        assert_eq!(cmd.tag, "INSERT 0 3");
    }

    #[test]
    fn message_name() {
        assert_eq!(BackendMessage::message_name(b'Z'), "ReadyForQuery");
        assert_eq!(BackendMessage::message_name(b'~'), "Unknown");
    }
}
