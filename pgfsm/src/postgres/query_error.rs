//! Server reported error and notice.
use bytes::Bytes;
use std::fmt;

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// Error reported by the server in an `ErrorResponse`.
///
/// Query errors abort the current transaction but the connection stays usable.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone)]
pub struct QueryError {
    severity: ByteStr,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
}

impl QueryError {
    /// Parse fields of an `ErrorResponse` or `NoticeResponse` body.
    pub fn parse(mut body: Bytes) -> Result<QueryError, ProtocolError> {
        let mut severity = None;
        let mut localized = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;

        loop {
            let ty = body.take_u8()?;
            if ty == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match ty {
                // non localized, present in protocol 3.0 from postgres 9.6
                b'V' => severity = Some(value),
                b'S' => localized = Some(value),
                b'C' => code = Some(value),
                b'M' => message = Some(value),
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                b'P' => position = value.parse().ok(),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        Ok(QueryError {
            severity: severity.or(localized).unwrap_or_default(),
            code: code.unwrap_or_default(),
            message: message.unwrap_or_default(),
            detail,
            hint,
            position,
        })
    }

    /// `ERROR`, `FATAL`, or `PANIC` (in an error message), or `WARNING`, `NOTICE`,
    /// `DEBUG`, `INFO`, or `LOG` (in a notice message).
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// SQLSTATE class of [`code`][QueryError::code].
    pub fn sqlstate(&self) -> SqlState {
        SqlState::from_code(&self.code)
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Error cursor position as an index into the original query string, counted in characters.
    pub fn position(&self) -> Option<u32> {
        self.position
    }
}

impl std::error::Error for QueryError { }

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// SQLSTATE class, the first two characters of the code.
///
/// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlState {
    /// Class 00, 01, 02
    Warning,
    /// Class 08
    ConnectionException,
    /// Class 0A
    FeatureNotSupported,
    /// Class 22
    DataException,
    /// Class 23
    IntegrityConstraintViolation,
    /// Class 25
    InvalidTransactionState,
    /// Class 28
    InvalidAuthorization,
    /// Class 40
    TransactionRollback,
    /// Class 42
    SyntaxErrorOrAccessRuleViolation,
    /// Class 53
    InsufficientResources,
    /// Class 57
    OperatorIntervention,
    /// Class XX
    InternalError,
    /// Any other class.
    Other,
}

impl SqlState {
    pub fn from_code(code: &str) -> SqlState {
        match code.get(..2) {
            Some("00" | "01" | "02") => SqlState::Warning,
            Some("08") => SqlState::ConnectionException,
            Some("0A") => SqlState::FeatureNotSupported,
            Some("22") => SqlState::DataException,
            Some("23") => SqlState::IntegrityConstraintViolation,
            Some("25") => SqlState::InvalidTransactionState,
            Some("28") => SqlState::InvalidAuthorization,
            Some("40") => SqlState::TransactionRollback,
            Some("42") => SqlState::SyntaxErrorOrAccessRuleViolation,
            Some("53") => SqlState::InsufficientResources,
            Some("57") => SqlState::OperatorIntervention,
            Some("XX") => SqlState::InternalError,
            _ => SqlState::Other,
        }
    }
}
