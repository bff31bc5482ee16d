//! Table schema and row paging.
use std::fmt;

use crate::{
    Result,
    catalog::TypeCache,
    common::{ByteStr, instrument},
    connection::Connection,
    postgres::Oid,
    query::{self, QueryResult},
};

/// Rows fetched by [`select_table`] when no limit is given.
pub const DEFAULT_LIMIT: u32 = 50;

/// `type_modifier` value of a type without modifier.
pub const NO_MODIFIER: i32 = -1;

/// Columns of a table, resolved against a [`TypeCache`].
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: ByteStr,
    pub type_oid: Oid,
    pub type_name: ByteStr,
    pub modifier: i32,
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ColumnSchema { name, type_name, modifier, .. } = self;
        match *modifier {
            NO_MODIFIER => write!(f, "{name:>25} {type_name}"),
            modifier => write!(f, "{name:>25} {type_name}({modifier})"),
        }
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table {} has {} columns:", self.table, self.columns.len())?;
        for column in &self.columns {
            write!(f, "\n{column}")?;
        }
        Ok(())
    }
}

/// Describe the columns of `table` by selecting at most one row.
///
/// `table` is inserted into the statement as is, it may be schema qualified or quoted.
pub async fn probe_table(conn: &mut Connection, cache: &TypeCache, table: &str) -> Result<TableSchema> {
    let sql = format!("SELECT * FROM {table} LIMIT 1");
    let result = instrument!(query::exec(conn, &sql), "probe_table", table).await?;

    let columns = result
        .fields()
        .iter()
        .map(|field| ColumnSchema {
            name: field.name.clone(),
            type_oid: field.type_oid,
            type_name: match cache.lookup(field.type_oid) {
                Some(desc) => desc.name.clone(),
                None => ByteStr::from_static(crate::catalog::UNKNOWN_TYPE),
            },
            modifier: field.type_modifier,
        })
        .collect();

    Ok(TableSchema { table: table.into(), columns })
}

/// Fetch the first `limit` rows of `table`, [`DEFAULT_LIMIT`] if [`None`].
pub async fn select_table(conn: &mut Connection, table: &str, limit: Option<u32>) -> Result<QueryResult> {
    let mut buf = itoa::Buffer::new();
    let limit = buf.format(limit.unwrap_or(DEFAULT_LIMIT));
    let sql = format!("SELECT * FROM {table} LIMIT {limit}");
    instrument!(query::exec(conn, &sql), "select_table", table).await
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::{
        catalog::TypeDescriptor,
        postgres::oid,
        query::ResultStatus,
        test_util::{self, msg},
    };

    fn cache() -> TypeCache {
        TypeCache::from_descriptors(vec![
            TypeDescriptor { oid: oid::INT4, name: "int4".into(), len: 4, elem: 0, array: 1007 },
            TypeDescriptor { oid: oid::VARCHAR, name: "varchar".into(), len: -1, elem: 0, array: 1015 },
        ])
    }

    #[test]
    fn column_rendering() {
        let plain = ColumnSchema {
            name: "id".into(),
            type_oid: oid::INT4,
            type_name: "int4".into(),
            modifier: NO_MODIFIER,
        };
        assert_eq!(plain.to_string(), format!("{:>25} int4", "id"));

        let modified = ColumnSchema { modifier: 68, ..plain.clone() };
        assert!(modified.to_string().ends_with(" int4(68)"));
        assert_eq!(modified.to_string().len(), 25 + " int4(68)".len());
    }

    #[tokio::test]
    async fn probe_resolves_types() {
        let mut script = msg::row_description(&[
            ("id", oid::INT4, 4, -1, 0),
            ("email", oid::VARCHAR, -1, 260, 0),
            ("shape", 600, 16, -1, 0),
        ]);
        script.extend(msg::command_complete("SELECT 0"));
        script.extend(msg::ready());
        let (mut conn, mut server) = test_util::connect(&script).await;

        let schema = probe_table(&mut conn, &cache(), "users").await.unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert_eq!(schema.columns[1].type_name, "varchar");
        assert_eq!(schema.columns[2].type_name, "unknown");

        let rendered = schema.to_string();
        let mut lines = rendered.lines();
        assert_eq!(lines.next(), Some("Table users has 3 columns:"));
        assert_eq!(lines.next().map(str::trim_start), Some("id int4"));
        assert_eq!(lines.next().map(str::trim_start), Some("email varchar(260)"));
        assert_eq!(lines.next().map(str::trim_start), Some("shape unknown"));
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        let sent = test_util::skip_startup(&sent);
        assert_eq!(&sent[5..], b"SELECT * FROM users LIMIT 1\0");
    }

    #[tokio::test]
    async fn select_default_limit() {
        let mut script = msg::row_description(&[("id", oid::INT4, 4, -1, 0)]);
        script.extend(msg::data_row(&[Some(&b"7"[..])]));
        script.extend(msg::command_complete("SELECT 1"));
        script.extend(msg::ready());
        let (mut conn, mut server) = test_util::connect(&script).await;

        let result = select_table(&mut conn, "public.users", None).await.unwrap();
        assert_eq!(result.status(), ResultStatus::TuplesOk);
        assert_eq!(result.rows().len(), 1);
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        let sent = test_util::skip_startup(&sent);
        assert_eq!(&sent[5..], b"SELECT * FROM public.users LIMIT 50\0");
    }

    #[tokio::test]
    async fn select_missing_table() {
        let mut script = msg::error("ERROR", "42P01", "relation \"nope\" does not exist");
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let err = select_table(&mut conn, "nope", Some(5)).await.unwrap_err();
        assert_eq!(err.as_database().unwrap().message(), "relation \"nope\" does not exist");
    }
}
