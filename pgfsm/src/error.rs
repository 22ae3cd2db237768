//! `pgfsm` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::ConfigError,
    machine::{Terminated, TransactionAborted, UnsupportedAuth},
    postgres::{ProtocolError, QueryError},
    value::{DecodeError, EncodeError},
};

/// A specialized [`Result`] type for `pgfsm` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgfsm` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Error that terminates the connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Config(_)
                | ErrorKind::Io(_)
                | ErrorKind::Protocol(_)
                | ErrorKind::UnsupportedAuth(_)
                | ErrorKind::Terminated(_)
        )
    }

    /// Error that aborts the transaction, the connection stays usable.
    pub fn is_query_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Query(_) | ErrorKind::TransactionAborted(_))
    }

    /// Returns the server reported error, if any.
    pub fn as_query_error(&self) -> Option<&QueryError> {
        match &self.kind {
            ErrorKind::Query(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `pgfsm` library.
pub enum ErrorKind {
    /// Invalid connection options.
    Config(ConfigError),
    /// Transport failure.
    Io(io::Error),
    /// Malformed or out of sequence message.
    Protocol(ProtocolError),
    /// Server requested an authentication method that is not implemented.
    UnsupportedAuth(UnsupportedAuth),
    /// Connection is terminated.
    Terminated(Terminated),
    /// Server reported error.
    Query(QueryError),
    /// Operation was queued in a transaction that has been rolled back.
    TransactionAborted(TransactionAborted),
    /// Field decoding failed.
    Decode(DecodeError),
    /// Parameter encoding failed.
    Encode(EncodeError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<Terminated>e => ErrorKind::Terminated(e));
from!(<QueryError>e => ErrorKind::Query(e));
from!(<TransactionAborted>e => ErrorKind::TransactionAborted(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<EncodeError>e => ErrorKind::Encode(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Terminated(e) => e.fmt(f),
            Self::Query(e) => e.fmt(f),
            Self::TransactionAborted(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
