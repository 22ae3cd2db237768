//! Protocol error
use std::{fmt, str::Utf8Error};

use super::BackendMessage;

/// An error when translating buffer from postgres.
///
/// Protocol errors are fatal, the connection is terminated.
pub enum ProtocolError {
    /// Message received is not expected in current phase.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Message length header is invalid.
    InvalidLength {
        len: i32,
    },
    /// Message length exceed configured maximum.
    TooLarge {
        len: usize,
        max: usize,
    },
    /// Message body does not follow its format.
    Malformed {
        reason: &'static str,
    },
    /// `DataRow` received without `RowDescription`, or its column count mismatch.
    RowMismatch {
        expect: Option<u16>,
        found: u16,
    },
    /// Postgres string is not utf8.
    Utf8(Utf8Error),
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("protocol error, ")?;
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(found);
                match expect {
                    Some(m) => write!(
                        f,
                        "expected message `{}` found `{found}`",
                        BackendMessage::message_name(m),
                    )?,
                    None => write!(f, "unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::InvalidLength { len } => write!(f, "invalid message length: {len}"),
            ProtocolError::TooLarge { len, max } => {
                write!(f, "message length {len} exceed maximum of {max}")
            },
            ProtocolError::Malformed { reason } => write!(f, "malformed message: {reason}"),
            ProtocolError::RowMismatch { expect: Some(expect), found } => {
                write!(f, "data row has {found} columns, row description has {expect}")
            },
            ProtocolError::RowMismatch { expect: None, found } => {
                write!(f, "data row with {found} columns received without row description")
            },
            ProtocolError::Utf8(ref e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl ProtocolError {
    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { reason }
    }
}
