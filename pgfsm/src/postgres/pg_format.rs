use super::ProtocolError;

/// Postgres data transmission format.
///
/// Which format is used for a column is decided per oid by the
/// [`TypeRegistry`][crate::value::TypeRegistry].
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the text transmitted representation, there is no trailing null character.
    #[default]
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most significant byte first).
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Parse format code sent by the backend.
    pub fn from_code(code: u16) -> Result<PgFormat, ProtocolError> {
        match code {
            0 => Ok(PgFormat::Text),
            1 => Ok(PgFormat::Binary),
            _ => Err(ProtocolError::malformed("unknown format code")),
        }
    }
}
