//! Type catalog cache.
//!
//! Column metadata only carries the type [`Oid`], [`TypeCache`] maps it back to
//! the type name using a single snapshot of `pg_type`.
use std::fmt;

use crate::{
    Error,
    common::{ByteStr, instrument, verbose, warning},
    connection::Connection,
    postgres::{Oid, PgFormat},
    query::{self, ResultStatus},
    row::{DecodeError, FromRow, Row},
};

/// Catalog query, rows are requested in binary format.
pub const TYPE_QUERY: &str = "SELECT oid, typname, typlen, typelem, typarray FROM pg_type ORDER BY oid";

/// Name returned by [`TypeCache::type_name`] for an oid not in the cache.
pub const UNKNOWN_TYPE: &str = "unknown";

/// One `pg_type` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub oid: Oid,
    pub name: ByteStr,
    /// Byte width, negative for variable-length types.
    pub len: i16,
    /// Element type of an array type, `0` otherwise.
    pub elem: Oid,
    /// Array type with this type as element, `0` if none.
    pub array: Oid,
}

impl TypeDescriptor {
    /// Fixed-width types like `point` have an element type too,
    /// only variable-length ones are true arrays.
    pub fn is_array(&self) -> bool {
        self.elem != 0 && self.len == -1
    }

    pub fn is_variable_length(&self) -> bool {
        self.len < 0
    }
}

impl FromRow for TypeDescriptor {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        let (oid, name, len, elem, array) = row.decode()?;
        Ok(Self { oid, name, len, elem, array })
    }
}

/// Type descriptors sorted by oid.
///
/// Built once, read-only afterward.
#[derive(Debug, Clone, Default)]
pub struct TypeCache {
    types: Vec<TypeDescriptor>,
}

impl TypeCache {
    /// Snapshot `pg_type`.
    ///
    /// An empty result is not an error, every lookup will miss.
    pub async fn build(conn: &mut Connection) -> Result<TypeCache, TypeCacheError> {
        let fetch = query::exec_params(conn, TYPE_QUERY, &[], PgFormat::Binary);
        let result = instrument!(fetch, "type_cache")
            .await
            .map_err(TypeCacheError::Query)?;

        if result.status() != ResultStatus::TuplesOk {
            return Err(TypeCacheError::Status(result.status()));
        }

        let types = result
            .decode_rows::<TypeDescriptor>()
            .map_err(TypeCacheError::Decode)?;

        if types.is_empty() {
            warning!("pg_type returned no rows, every type will be reported as {UNKNOWN_TYPE}");
        }
        verbose!(len = types.len(), "type cache built");

        Ok(Self::from_descriptors(types))
    }

    /// Build from descriptors in any order.
    pub fn from_descriptors(mut types: Vec<TypeDescriptor>) -> TypeCache {
        if !types.is_sorted_by_key(|e| e.oid) {
            types.sort_unstable_by_key(|e| e.oid);
        }
        Self { types }
    }

    /// Binary search by oid.
    pub fn lookup(&self, oid: Oid) -> Option<&TypeDescriptor> {
        let idx = self.types.binary_search_by_key(&oid, |e| e.oid).ok()?;
        Some(&self.types[idx])
    }

    /// Type name, or `"unknown"`.
    pub fn type_name(&self, oid: Oid) -> &str {
        self.lookup(oid).map_or(UNKNOWN_TYPE, |e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypeDescriptor> {
        self.types.iter()
    }
}

impl<'a> IntoIterator for &'a TypeCache {
    type Item = &'a TypeDescriptor;

    type IntoIter = std::slice::Iter<'a, TypeDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An error when building [`TypeCache`].
pub enum TypeCacheError {
    /// Query failed, including server reported error.
    Query(Error),
    /// Query did not return rows.
    Status(ResultStatus),
    /// Row does not have the expected shape.
    Decode(DecodeError),
}

impl std::error::Error for TypeCacheError { }

impl fmt::Display for TypeCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unable to retrieve types from pg_type : ")?;
        match self {
            Self::Query(e) => write!(f, "{e}"),
            Self::Status(status) => write!(f, "unexpected result status {status}"),
            Self::Decode(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for TypeCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl TypeCacheError {
    /// Process exit code, server side failures are `2`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Query(e) => e.exit_code(),
            Self::Status(_) | Self::Decode(_) => 2,
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::{
        postgres::oid,
        test_util::{self, msg},
    };

    fn desc(oid: Oid, name: &'static str, len: i16, elem: Oid, array: Oid) -> TypeDescriptor {
        TypeDescriptor { oid, name: ByteStr::from_static(name), len, elem, array }
    }

    #[test]
    fn snapshot_lookup() {
        let cache = TypeCache::from_descriptors(vec![desc(23, "int4", 4, 0, 1007)]);

        let int4 = cache.lookup(23).unwrap();
        assert_eq!(int4.len, 4);
        assert_eq!(int4.name, "int4");
        assert!(!int4.is_array());
        assert!(cache.lookup(99999).is_none());
        assert_eq!(cache.type_name(99999), "unknown");
    }

    #[test]
    fn lookup_never_returns_neighbor() {
        let cache = TypeCache::from_descriptors(vec![
            desc(1007, "_int4", -1, 23, 0),
            desc(16, "bool", 1, 0, 1000),
            desc(25, "text", -1, 0, 1009),
            desc(20, "int8", 8, 0, 1016),
            desc(23, "int4", 4, 0, 1007),
        ]);
        assert_eq!(cache.len(), 5);
        assert!(cache.iter().map(|e| e.oid).is_sorted());

        for oid in 0..2000 {
            match cache.lookup(oid) {
                Some(found) => assert_eq!(found.oid, oid),
                None => assert!(!matches!(oid, 16 | 20 | 23 | 25 | 1007)),
            }
        }

        let array = cache.lookup(1007).unwrap();
        assert!(array.is_array());
        assert!(array.is_variable_length());
        assert_eq!(cache.type_name(array.elem), "int4");
    }

    #[test]
    fn empty_cache() {
        let cache = TypeCache::default();
        assert!(cache.is_empty());
        assert!(cache.lookup(23).is_none());
        assert_eq!(cache.type_name(23), UNKNOWN_TYPE);
    }

    fn catalog_row(oid: u32, name: &str, len: i16, elem: u32, array: u32) -> Vec<u8> {
        msg::data_row(&[
            Some(&oid.to_be_bytes()[..]),
            Some(name.as_bytes()),
            Some(&len.to_be_bytes()[..]),
            Some(&elem.to_be_bytes()[..]),
            Some(&array.to_be_bytes()[..]),
        ])
    }

    fn catalog_description() -> Vec<u8> {
        msg::row_description(&[
            ("oid", oid::OID, 4, -1, 1),
            ("typname", oid::NAME, 64, -1, 1),
            ("typlen", oid::INT2, 2, -1, 1),
            ("typelem", oid::OID, 4, -1, 1),
            ("typarray", oid::OID, 4, -1, 1),
        ])
    }

    #[tokio::test]
    async fn build_from_binary_rows() {
        let mut script = msg::parse_bind_complete();
        script.extend(catalog_description());
        script.extend(catalog_row(16, "bool", 1, 0, 1000));
        script.extend(catalog_row(23, "int4", 4, 0, 1007));
        script.extend(catalog_row(1007, "_int4", -1, 23, 0));
        script.extend(msg::command_complete("SELECT 3"));
        script.extend(msg::ready());
        let (mut conn, mut server) = test_util::connect(&script).await;

        let cache = TypeCache::build(&mut conn).await.unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.lookup(1007), Some(&desc(1007, "_int4", -1, 23, 0)));
        assert_eq!(cache.type_name(16), "bool");
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        let frames = test_util::frames(test_util::skip_startup(&sent));

        let (_, parse) = frames.iter().find(|(msgtype, _)| *msgtype == b'P').unwrap();
        assert_eq!(&parse[1..parse.len() - 3], TYPE_QUERY.as_bytes());

        // no parameters, one result format code: binary
        let (_, bind) = frames.iter().find(|(msgtype, _)| *msgtype == b'B').unwrap();
        assert!(bind.ends_with(b"\0\0\0\x01\0\x01"));
    }

    #[tokio::test]
    async fn build_empty() {
        let mut script = msg::parse_bind_complete();
        script.extend(catalog_description());
        script.extend(msg::command_complete("SELECT 0"));
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let cache = TypeCache::build(&mut conn).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn build_permission_denied() {
        let mut script = msg::error("ERROR", "42501", "permission denied for table pg_type");
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let err = TypeCache::build(&mut conn).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(
            err.to_string()
                .starts_with("Unable to retrieve types from pg_type : ERROR:  permission denied")
        );
    }
}
