//! Result storage, built while a query is in flight.
use bytes::Bytes;
use std::{ops::Range, sync::Arc};

use crate::{
    common::ByteStr,
    ext::BytesExt,
    postgres::{Oid, PgFormat, ProtocolError, backend},
    value::TypeRegistry,
};

/// Column metadata from a `RowDescription` message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table, the object ID of the table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table, the attribute number of the column; otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size. Negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier.
    pub type_modifier: i32,
    /// The format of the field values.
    pub format: PgFormat,
}

/// Ordered column metadata of a result.
///
/// Cheap to clone, shared between the prepared statement cache and results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowDescription {
    fields: Arc<[FieldDescription]>,
}

impl RowDescription {
    /// Parse `RowDescription` message.
    pub fn parse(msg: backend::RowDescription) -> Result<Self, ProtocolError> {
        let backend::RowDescription { field_len, mut body } = msg;
        let mut fields = Vec::with_capacity(field_len as usize);

        for _ in 0..field_len {
            fields.push(FieldDescription {
                name: body.get_nul_bytestr()?,
                table_oid: body.take_u32()?,
                column_id: body.take_i16()?,
                type_oid: body.take_u32()?,
                type_size: body.take_i16()?,
                type_modifier: body.take_i32()?,
                format: PgFormat::from_code(body.take_u16()?)?,
            });
        }

        Ok(Self { fields: fields.into() })
    }

    /// Copy of self with every format set to the registry preference.
    ///
    /// Describing a statement always reports text format, the actual format
    /// is what the client requests in `Bind`.
    pub fn with_formats(&self, registry: &TypeRegistry) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|e| FieldDescription { format: registry.format(e.type_oid), ..e.clone() })
            .collect::<Vec<_>>();
        Self { fields: fields.into() }
    }

    /// Result format codes to request in `Bind`.
    pub fn formats(&self) -> Vec<PgFormat> {
        self.fields.iter().map(|e| e.format).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDescription> {
        self.fields.get(index)
    }

    /// Position of the first field named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|e| e.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescription> {
        self.fields.iter()
    }
}

/// One data row, spans into the `DataRow` payload.
#[derive(Debug)]
pub(crate) struct RowData {
    body: Bytes,
    /// [`None`] is NULL.
    spans: Box<[Option<Range<usize>>]>,
}

impl RowData {
    fn parse(msg: backend::DataRow) -> Result<Self, ProtocolError> {
        let backend::DataRow { column_len, body } = msg;
        let mut spans = Vec::with_capacity(column_len as usize);
        let mut read = body.clone();
        let mut offset = 0;

        for _ in 0..column_len {
            let len = read.take_i32()?;
            offset += 4;
            if len < 0 {
                spans.push(None);
                continue;
            }
            let len = len as usize;
            read.take_bytes(len)?;
            spans.push(Some(offset..offset + len));
            offset += len;
        }

        Ok(Self { body, spans: spans.into() })
    }

    pub(crate) fn len(&self) -> usize {
        self.spans.len()
    }

    /// Field bytes, [`None`] is NULL.
    pub(crate) fn get(&self, index: usize) -> Option<&[u8]> {
        let span = self.spans.get(index)?.clone()?;
        Some(&self.body[span])
    }
}

/// Rows of one statement result.
///
/// Exclusively owned by the connection while rows arrive, then frozen
/// behind an [`Arc`] in a [`Resultset`][super::Resultset].
#[derive(Debug)]
pub(crate) struct ResultBuffer {
    pub(crate) description: Option<RowDescription>,
    pub(crate) rows: Vec<RowData>,
    pub(crate) command_tag: Option<ByteStr>,
    pub(crate) registry: Arc<TypeRegistry>,
}

impl ResultBuffer {
    /// Buffer for a statement whose columns are not known yet.
    pub(crate) fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { description: None, rows: vec![], command_tag: None, registry }
    }

    pub(crate) fn with_description(description: RowDescription, registry: Arc<TypeRegistry>) -> Self {
        Self { description: Some(description), rows: vec![], command_tag: None, registry }
    }

    /// Append a `DataRow`.
    ///
    /// A row without description, or with different column count, is a protocol error.
    pub(crate) fn push(&mut self, msg: backend::DataRow) -> Result<(), ProtocolError> {
        let expect = self.description.as_ref().map(|e| e.len());
        if expect != Some(msg.column_len as usize) {
            return Err(ProtocolError::RowMismatch {
                expect: expect.map(|e| e as u16),
                found: msg.column_len,
            });
        }
        self.rows.push(RowData::parse(msg)?);
        Ok(())
    }

    pub(crate) fn description(&self) -> &[FieldDescription] {
        match &self.description {
            Some(desc) => &desc.fields,
            None => &[],
        }
    }
}
