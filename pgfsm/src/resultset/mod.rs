//! Query result model.
//!
//! - [`Resultset`]
//! - [`Row`]
//! - [`Field`]
//! - [`FromRow`]
//!
//! A [`Resultset`] is an immutable view over rows of one statement. [`Row`] and [`Field`]
//! are cursors holding a reference counted handle of the same storage, cloning them never
//! copies row bytes, and a cursor keeps the storage alive after the [`Resultset`] is dropped.
use std::{fmt, iter::FusedIterator, sync::Arc};

use crate::{
    ext::FmtExt,
    value::{DecodeError, FromValue, Value},
};

mod buffer;

pub use buffer::{FieldDescription, RowDescription};
pub(crate) use buffer::ResultBuffer;

/// Rows returned by one statement.
#[derive(Clone)]
pub struct Resultset {
    buf: Arc<ResultBuffer>,
}

impl Resultset {
    /// Freeze a buffer.
    pub(crate) fn new(buf: ResultBuffer) -> Self {
        Self { buf: Arc::new(buf) }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.buf.rows.len()
    }

    /// Returns `true` if there is no rows.
    pub fn is_empty(&self) -> bool {
        self.buf.rows.is_empty()
    }

    /// Iterate rows, in either direction.
    pub fn iter(&self) -> Rows {
        Rows { buf: self.buf.clone(), front: 0, back: self.len() }
    }

    pub fn first(&self) -> Option<Row> {
        self.at(0).ok()
    }

    pub fn last(&self) -> Option<Row> {
        self.len().checked_sub(1).map(|i| self.row(i))
    }

    /// Returns row at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range, see [`Resultset::at`] for checked access.
    pub fn row(&self, index: usize) -> Row {
        assert!(
            index < self.len(),
            "row index {index} out of range for length {}",
            self.len()
        );
        Row { buf: self.buf.clone(), index }
    }

    /// Returns row at `index`, or [`DecodeError::OutOfRange`].
    pub fn at(&self, index: usize) -> Result<Row, DecodeError> {
        match index < self.len() {
            true => Ok(Row { buf: self.buf.clone(), index }),
            false => Err(DecodeError::OutOfRange { index, len: self.len() }),
        }
    }

    /// Returns the number of columns.
    pub fn columns_len(&self) -> usize {
        self.buf.description().len()
    }

    /// Returns the column index of `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.buf.description().iter().position(|e| e.name == name)
    }

    /// Returns column description at `index`.
    pub fn field(&self, index: usize) -> Result<&FieldDescription, DecodeError> {
        let desc = self.buf.description();
        desc.get(index).ok_or(DecodeError::OutOfRange { index, len: desc.len() })
    }

    /// Returns column description named `name`.
    pub fn field_by_name(&self, name: &str) -> Result<&FieldDescription, DecodeError> {
        match self.index_of(name) {
            Some(index) => self.field(index),
            None => Err(DecodeError::ColumnNotFound(name.to_owned().into())),
        }
    }

    /// Returns column name at `index`.
    pub fn field_name(&self, index: usize) -> Result<&str, DecodeError> {
        self.field(index).map(|e| e.name.as_str())
    }

    /// Returns all column descriptions.
    pub fn description(&self) -> &[FieldDescription] {
        self.buf.description()
    }

    /// The command tag of the statement, e.g. `SELECT 2`.
    ///
    /// [`None`] for an empty query.
    pub fn command_tag(&self) -> Option<&str> {
        self.buf.command_tag.as_deref()
    }

    /// The number of rows inserted, updated, deleted, or retrieved, parsed from the command tag.
    pub fn rows_affected(&self) -> u64 {
        self.command_tag().map(rows_affected).unwrap_or_default()
    }
}

fn rows_affected(tag: &str) -> u64 {
    let mut whs = tag.split_whitespace();
    let Some(command) = whs.next() else {
        return 0;
    };
    let Some(rows) = whs.next() else {
        return 0;
    };
    match command {
        // INSERT oid rows
        "INSERT" => whs.next().unwrap_or_default(),
        "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}

impl IntoIterator for &Resultset {
    type Item = Row;

    type IntoIter = Rows;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Resultset {
    type Item = Row;

    type IntoIter = Rows;

    fn into_iter(self) -> Self::IntoIter {
        let back = self.len();
        Rows { buf: self.buf, front: 0, back }
    }
}

impl fmt::Debug for Resultset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator of [`Row`].
pub struct Rows {
    buf: Arc<ResultBuffer>,
    front: usize,
    back: usize,
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let index = self.front;
        self.front += 1;
        Some(Row { buf: self.buf.clone(), index })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Rows {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(Row { buf: self.buf.clone(), index: self.back })
    }
}

impl ExactSizeIterator for Rows { }

impl FusedIterator for Rows { }

/// Cursor to a row in a [`Resultset`].
#[derive(Clone)]
pub struct Row {
    buf: Arc<ResultBuffer>,
    index: usize,
}

impl Row {
    /// Row position in its resultset.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.buf.rows[self.index].len()
    }

    /// Returns `true` if row contains no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate fields, in either direction.
    pub fn iter(&self) -> Fields {
        Fields { row: self.clone(), front: 0, back: self.len() }
    }

    /// Returns field at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range, see [`Row::try_field`] for checked access.
    pub fn field(&self, index: usize) -> Field {
        assert!(
            index < self.len(),
            "field index {index} out of range for length {}",
            self.len()
        );
        Field { buf: self.buf.clone(), row: self.index, index }
    }

    /// Returns field at `index`, or [`DecodeError::OutOfRange`].
    pub fn try_field(&self, index: usize) -> Result<Field, DecodeError> {
        match index < self.len() {
            true => Ok(Field { buf: self.buf.clone(), row: self.index, index }),
            false => Err(DecodeError::OutOfRange { index, len: self.len() }),
        }
    }

    /// Returns field of column `name`, or [`DecodeError::ColumnNotFound`].
    pub fn field_by_name(&self, name: &str) -> Result<Field, DecodeError> {
        match self.buf.description().iter().position(|e| e.name == name) {
            Some(index) => self.try_field(index),
            None => Err(DecodeError::ColumnNotFound(name.to_owned().into())),
        }
    }

    /// Decode field at `index`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, DecodeError> {
        self.try_field(index)?.get()
    }

    /// Decode field of column `name`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, DecodeError> {
        self.field_by_name(name)?.get()
    }

    /// Decode the whole row using [`FromRow`] implementation.
    pub fn to<R: FromRow>(&self) -> Result<R, DecodeError> {
        R::from_row(self)
    }
}

impl IntoIterator for &Row {
    type Item = Field;

    type IntoIter = Fields;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for field in self {
            dbg.key(&field.name());
            match field.as_bytes() {
                Some(value) => dbg.value(&value.lossy()),
                None => dbg.value(&format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// Iterator of [`Field`].
pub struct Fields {
    row: Row,
    front: usize,
    back: usize,
}

impl Iterator for Fields {
    type Item = Field;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let index = self.front;
        self.front += 1;
        Some(Field { buf: self.row.buf.clone(), row: self.row.index, index })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Fields {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(Field { buf: self.row.buf.clone(), row: self.row.index, index: self.back })
    }
}

impl ExactSizeIterator for Fields { }

impl FusedIterator for Fields { }

/// Cursor to a field in a [`Row`].
#[derive(Clone)]
pub struct Field {
    buf: Arc<ResultBuffer>,
    row: usize,
    index: usize,
}

impl Field {
    /// Index of the row this field belongs to.
    pub fn row_index(&self) -> usize {
        self.row
    }

    /// Column index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.description().name
    }

    /// Column description.
    pub fn description(&self) -> &FieldDescription {
        &self.buf.description()[self.index]
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.as_bytes().is_none()
    }

    /// Return `true` if value is NULL or has zero length.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_none_or(|e| e.is_empty())
    }

    /// Raw field bytes, [`None`] if value is NULL.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.buf.rows[self.row].get(self.index)
    }

    /// Decode field with the connection type registry.
    pub fn value(&self) -> Result<Value, DecodeError> {
        let desc = self.description();
        self.buf.registry.decode(desc.type_oid, desc.format, self.as_bytes())
    }

    /// Decode field into `T`.
    pub fn get<T: FromValue>(&self) -> Result<T, DecodeError> {
        T::from_value(self.value()?)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            Some(value) => write!(f, "{}: {:?}", self.name(), value.lossy()),
            None => write!(f, "{}: NULL", self.name()),
        }
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: &Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, DecodeError> {
        Ok(row.clone())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: &Row) -> Result<Self, DecodeError> {
        row.iter().map(|e| e.value()).collect()
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: FromValue),*
        {
            fn from_row(row: &Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);
