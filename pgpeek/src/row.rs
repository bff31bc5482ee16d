//! Postgres row operation.
//!
//! - [`Field`]
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, num::ParseIntError, str::Utf8Error, string::FromUtf8Error, sync::Arc};

use crate::{
    common::ByteStr,
    ext::{BytesExt, FmtExt},
    postgres::{
        Oid, PgFormat, PgType, ProtocolError,
        backend::{DataRow, RowDescription},
    },
};

// <https://www.postgresql.org/docs/current/protocol-message-formats.html#PROTOCOL-MESSAGE-FORMATS-ROWDESCRIPTION>
// table_oid
// column_id
// type_oid
// type_size
// type_modifier
// format_code
const SUFFIX: usize = size_of::<u32>()
    + size_of::<i16>()
    + size_of::<u32>()
    + size_of::<i16>()
    + size_of::<i32>()
    + size_of::<u16>();

/// Column metadata from `RowDescription`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: ByteStr,
    /// Oid of the source table, zero if the column is not a table column.
    pub table_oid: Oid,
    /// Attribute number of the column, zero if not a table column.
    pub column_id: i16,
    pub type_oid: Oid,
    /// Negative values denote variable-width types.
    pub type_size: i16,
    /// `-1` when the type has no modifier.
    pub type_modifier: i32,
    pub format: PgFormat,
}

impl Field {
    /// Decode every field of a `RowDescription`.
    pub fn decode_all(desc: RowDescription) -> Result<Arc<[Field]>, ProtocolError> {
        let mut body = desc.body;
        (0..desc.field_len)
            .map(|_| {
                let name = body.get_nul_bytestr()?;
                body.require(SUFFIX, "row description field too short")?;
                Ok(Field {
                    name,
                    table_oid: body.get_u32(),
                    column_id: body.get_i16(),
                    type_oid: body.get_u32(),
                    type_size: body.get_i16(),
                    type_modifier: body.get_i32(),
                    format: PgFormat::from_code(body.get_u16())?,
                })
            })
            .collect()
    }
}

/// Postgres row.
#[derive(Clone)]
pub struct Row {
    fields: Arc<[Field]>,
    values: Vec<Option<Bytes>>,
}

impl Row {
    /// Split `DataRow` values, the column count must match `fields`.
    pub fn new(fields: Arc<[Field]>, row: DataRow) -> Result<Row, ProtocolError> {
        if row.column_len as usize != fields.len() {
            return Err(ProtocolError::malformed("data row column count differs from row description"));
        }

        let mut body = row.body;
        let mut values = Vec::with_capacity(fields.len());
        for _ in 0..row.column_len {
            body.require(4, "data row value length missing")?;
            let value = match body.get_i32() {
                len if len < 0 => None,
                len => {
                    body.require(len as usize, "data row value too short")?;
                    Some(body.split_to(len as usize))
                },
            };
            values.push(value);
        }

        Ok(Self { fields, values })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of fields/column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Get column at position, panics when out of bounds.
    fn column(&self, nth: usize) -> Column {
        let field = &self.fields[nth];
        Column {
            name: field.name.clone(),
            oid: field.type_oid,
            format: field.format,
            value: self.values[nth].clone(),
        }
    }

    /// Iterate all columns.
    pub fn columns(&self) -> impl ExactSizeIterator<Item = Column> + '_ {
        (0..self.values.len()).map(|nth| self.column(nth))
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let nth = idx.position(&self.fields)?;
        R::decode(self.column(nth))
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (field, value) in self.fields.iter().zip(&self.values) {
            dbg.key(&field.name);
            match value {
                Some(value) => dbg.value(&value.lossy()),
                None => dbg.value(&format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// Postgres column.
#[derive(Debug, Clone)]
pub struct Column {
    name: ByteStr,
    oid: Oid,
    format: PgFormat,
    value: Option<Bytes>,
}

impl Column {
    /// Returns column [`Oid`].
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Returns column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn format(&self) -> PgFormat {
        self.format
    }

    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Consume self into the inner [`Bytes`].
    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    /// Try consume self into the inner [`Bytes`].
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }

    fn accept<T: PgType + ?Sized>(&self) -> Result<(), DecodeError> {
        match T::accepts(self.oid) {
            true => Ok(()),
            false => Err(DecodeError::OidMissmatch { expected: T::OID, found: self.oid }),
        }
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
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

/// A type that can be constructed from [`Column`].
///
/// Binary values are read in network byte order, text values are parsed.
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

macro_rules! decode_int {
    ($($ty:ty),*) => {$(
        impl Decode for $ty {
            fn decode(col: Column) -> Result<Self, DecodeError> {
                col.accept::<$ty>()?;
                let format = col.format;
                let value = col.try_into_value()?;
                match format {
                    PgFormat::Binary => {
                        let Ok(be) = <[u8; size_of::<$ty>()]>::try_from(&value[..]) else {
                            return Err(DecodeError::InvalidLength {
                                expected: size_of::<$ty>(),
                                found: value.len(),
                            });
                        };
                        Ok(<$ty>::from_be_bytes(be))
                    },
                    PgFormat::Text => Ok(std::str::from_utf8(&value)?.parse()?),
                }
            }
        }
    )*};
}

decode_int!(i16, i32, i64, u32);

impl Decode for bool {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.accept::<bool>()?;
        let format = col.format;
        let value = col.try_into_value()?;
        match (format, &value[..]) {
            (PgFormat::Binary, [b]) => Ok(*b != 0),
            (PgFormat::Text, b"t") => Ok(true),
            (PgFormat::Text, b"f") => Ok(false),
            _ => Err(DecodeError::InvalidBool),
        }
    }
}

impl Decode for String {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.accept::<String>()?;
        Ok(String::from_utf8(col.try_into_value().map(Into::into)?)?)
    }
}

impl Decode for ByteStr {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.accept::<ByteStr>()?;
        Ok(ByteStr::from_utf8(col.try_into_value()?)?)
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, fields: &[Field]) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, fields: &[Field]) -> Result<usize, DecodeError> {
        match self < fields.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, fields: &[Field]) -> Result<usize, DecodeError> {
        fields
            .iter()
            .position(|e| e.name == self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Column type cannot be decoded into the requested type.
    OidMissmatch {
        expected: Oid,
        found: Oid,
    },
    /// Row is null.
    Null,
    /// Binary value width differs from the requested type.
    InvalidLength {
        expected: usize,
        found: usize,
    },
    /// Text value is not a number.
    ParseInt(ParseIntError),
    /// Text value is neither `t` nor `f`.
    InvalidBool,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::OidMissmatch { expected, found } => {
                write!(f, "data type missmatch, expected oid {expected} found {found}")
            },
            Self::Null => write!(f, "unexpected NULL value"),
            Self::InvalidLength { expected, found } => {
                write!(f, "expected {expected} bytes found {found}")
            },
            Self::ParseInt(e) => write!(f, "{e}"),
            Self::InvalidBool => write!(f, "invalid boolean"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
from!(<ParseIntError>e => Self::ParseInt(e));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
