//! Query execution.
//!
//! - [`exec`], simple query protocol
//! - [`exec_params`], extended query protocol with text parameters
use std::{fmt, sync::Arc};

use crate::{
    ErrorKind, Result,
    common::{ByteStr, instrument, verbose, warning},
    connection::Connection,
    ext::FmtExt,
    postgres::{
        BackendMessage, PgFormat, ProtocolError,
        frontend::{Bind, Describe, Execute, Parse, Query, Sync},
    },
    row::{DecodeError, Field, FromRow, Row},
};

/// Outcome of a successful statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// The query string was empty.
    EmptyQuery,
    /// Statement returning no data completed.
    CommandOk,
    /// Statement returning rows completed.
    TuplesOk,
}

impl ResultStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::EmptyQuery => "PGRES_EMPTY_QUERY",
            ResultStatus::CommandOk => "PGRES_COMMAND_OK",
            ResultStatus::TuplesOk => "PGRES_TUPLES_OK",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    status: ResultStatus,
    fields: Arc<[Field]>,
    rows: Vec<Row>,
    tag: Option<ByteStr>,
}

impl QueryResult {
    fn empty_query() -> QueryResult {
        Self {
            status: ResultStatus::EmptyQuery,
            fields: Arc::from([]),
            rows: vec![],
            tag: None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Command tag, e.g. `SELECT 5` or `INSERT 0 1`.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Number of rows affected, parsed from the command tag.
    ///
    /// Returns `0` for commands that do not report a count.
    pub fn rows_affected(&self) -> u64 {
        self.tag().map(rows_affected).unwrap_or_default()
    }

    /// Decode every row using [`FromRow`].
    pub fn decode_rows<R: FromRow>(&self) -> Result<Vec<R>, DecodeError> {
        self.rows.iter().cloned().map(R::from_row).collect()
    }
}

fn rows_affected(tag: &str) -> u64 {
    let mut whs = tag.split_whitespace();
    let Some(tag) = whs.next() else {
        return 0;
    };
    let Some(rows) = whs.next() else {
        return 0;
    };
    match tag {
        // INSERT oid rows
        "INSERT" => whs.next().unwrap_or_default(),
        "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}

/// Rows are printed `|` separated with aligned columns, NULL is empty.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status != ResultStatus::TuplesOk {
            return match self.tag() {
                Some(tag) => f.write_str(tag),
                None => f.write_str(self.status.as_str()),
            };
        }

        let cells = self
            .rows
            .iter()
            .map(|row| {
                row.columns()
                    .map(|col| col.as_slice().map(|e| e.lossy().to_string()).unwrap_or_default())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut widths = self.fields.iter().map(|e| e.name.chars().count()).collect::<Vec<_>>();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        line(f, &widths, self.fields.iter().map(|e| e.name.as_str()))?;
        for row in &cells {
            line(f, &widths, row.iter().map(String::as_str))?;
        }

        match self.rows.len() {
            1 => write!(f, "(1 row)"),
            n => write!(f, "({n} rows)"),
        }
    }
}

fn line<'a>(
    f: &mut fmt::Formatter<'_>,
    widths: &[usize],
    values: impl Iterator<Item = &'a str>,
) -> fmt::Result {
    for (i, value) in values.enumerate() {
        let width = widths[i];
        match i + 1 == widths.len() {
            true => write!(f, "{value}")?,
            false => write!(f, "{value:<width$}|")?,
        }
    }
    writeln!(f)
}

/// Run `sql` using the simple query protocol.
///
/// The string may contain several statements, the result of the last one is returned.
/// Result values are in text format.
pub async fn exec(conn: &mut Connection, sql: &str) -> Result<QueryResult> {
    instrument!(simple_query(conn, sql), "exec", sql).await
}

/// Run `sql` using the extended query protocol.
///
/// `params` are bound to `$1..$n` in text format, the server infers their types.
/// `format` selects the result format of every column.
pub async fn exec_params(
    conn: &mut Connection,
    sql: &str,
    params: &[&str],
    format: PgFormat,
) -> Result<QueryResult> {
    let query = extended_query(conn, sql, params, format);
    instrument!(query, "exec_params", sql, params = params.len()).await
}

async fn simple_query(conn: &mut Connection, sql: &str) -> Result<QueryResult> {
    let stream = conn.stream();
    stream.send(Query { sql });
    stream.flush().await?;

    collect(conn, "simple query").await
}

async fn extended_query(
    conn: &mut Connection,
    sql: &str,
    params: &[&str],
    format: PgFormat,
) -> Result<QueryResult> {
    let values = params.iter().map(|e| Some(e.as_bytes())).collect::<Vec<_>>();

    let stream = conn.stream();
    stream.send(Parse {
        prepare_name: "",
        sql,
        oids: &[],
    });
    stream.send(Bind {
        portal_name: "",
        stmt_name: "",
        param_formats: &[],
        params: &values,
        result_formats: &[format],
    });
    stream.send(Describe { kind: b'P', name: "" });
    stream.send(Execute { portal_name: "", max_row: 0 });
    stream.send(Sync);
    stream.flush().await?;

    collect(conn, "extended query").await
}

/// Read responses until `ReadyForQuery`.
///
/// On any error other than io, the remaining responses are drained first so the
/// connection is ready for the next query. After an io error the connection is unusable.
#[cfg_attr(not(feature = "log"), allow(unused_variables))]
async fn collect(conn: &mut Connection, phase: &'static str) -> Result<QueryResult> {
    let err = match Collector::default().run(conn, phase).await {
        Ok(result) => return Ok(result),
        Err(err) => err,
    };

    if !matches!(err.kind(), ErrorKind::Io(_)) {
        if let Err(drain) = conn.ready().await {
            warning!("connection lost while recovering from \"{err}\": {drain}");
        }
    }

    Err(err)
}

#[derive(Default)]
struct Collector {
    fields: Option<Arc<[Field]>>,
    rows: Vec<Row>,
    last: Option<QueryResult>,
}

impl Collector {
    async fn run(mut self, conn: &mut Connection, phase: &'static str) -> Result<QueryResult> {
        loop {
            match conn.stream().recv::<BackendMessage>().await? {
                BackendMessage::ParseComplete(_) | BackendMessage::BindComplete(_) => {},
                BackendMessage::NoData(_) => self.fields = None,
                BackendMessage::RowDescription(desc) => {
                    self.fields = Some(Field::decode_all(desc)?);
                    self.rows.clear();
                },
                BackendMessage::DataRow(row) => {
                    let Some(fields) = &self.fields else {
                        return Err(ProtocolError::unexpected_phase(b'D', phase).into());
                    };
                    self.rows.push(Row::new(fields.clone(), row)?);
                },
                BackendMessage::CommandComplete(cmd) => self.complete(Some(cmd.tag)),
                BackendMessage::PortalSuspended(_) => self.complete(None),
                BackendMessage::EmptyQueryResponse(_) => self.last = Some(QueryResult::empty_query()),
                #[cfg_attr(not(feature = "verbose"), allow(unused_variables))]
                BackendMessage::ParameterStatus(status) => {
                    verbose!(name = %status.name, value = %status.value, "parameter status");
                },
                BackendMessage::ReadyForQuery(_) => break,
                other => return Err(ProtocolError::unexpected_phase(other.msgtype(), phase).into()),
            }
        }

        Ok(self.last.unwrap_or_else(QueryResult::empty_query))
    }

    fn complete(&mut self, tag: Option<ByteStr>) {
        let result = match self.fields.take() {
            Some(fields) => QueryResult {
                status: ResultStatus::TuplesOk,
                fields,
                rows: std::mem::take(&mut self.rows),
                tag,
            },
            None => QueryResult {
                status: ResultStatus::CommandOk,
                fields: Arc::from([]),
                rows: vec![],
                tag,
            },
        };
        self.last = Some(result);
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

    fn people() -> Vec<u8> {
        let mut out = msg::row_description(&[("id", oid::INT4, 4, -1, 0), ("name", oid::TEXT, -1, -1, 0)]);
        out.extend(msg::data_row(&[Some(&b"1"[..]), Some(&b"alice"[..])]));
        out.extend(msg::data_row(&[Some(&b"2"[..]), None]));
        out.extend(msg::command_complete("SELECT 2"));
        out
    }

    #[tokio::test]
    async fn simple_select() {
        let mut script = people();
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let result = exec(&mut conn, "SELECT id, name FROM people").await.unwrap();
        assert_eq!(result.status(), ResultStatus::TuplesOk);
        assert_eq!(result.fields().len(), 2);
        assert_eq!(result.rows_affected(), 2);

        let rows = result.decode_rows::<(i32, Option<String>)>().unwrap();
        assert_eq!(rows, [(1, Some(String::from("alice"))), (2, None)]);

        assert_eq!(result.to_string(), "id|name\n1 |alice\n2 |\n(2 rows)");
    }

    #[tokio::test]
    async fn last_statement_wins() {
        let mut script = msg::command_complete("CREATE TABLE");
        script.extend(msg::notice("table created"));
        script.extend(people());
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let result = exec(&mut conn, "CREATE TABLE people(); SELECT * FROM people").await.unwrap();
        assert_eq!(result.status(), ResultStatus::TuplesOk);
        assert_eq!(result.rows().len(), 2);
    }

    #[tokio::test]
    async fn error_keeps_connection_usable() {
        let mut script = msg::error("ERROR", "42P01", "relation \"nope\" does not exist");
        script.extend(msg::ready());
        script.extend(msg::command_complete("SET"));
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let err = exec(&mut conn, "SELECT * FROM nope").await.unwrap_err();
        assert_eq!(err.as_database().unwrap().code(), "42P01");

        let result = exec(&mut conn, "SET search_path TO public").await.unwrap();
        assert_eq!(result.status(), ResultStatus::CommandOk);
        assert_eq!(result.tag(), Some("SET"));
        assert_eq!(result.to_string(), "SET");
    }

    #[tokio::test]
    async fn malformed_row_keeps_connection_usable() {
        let mut script = msg::row_description(&[("id", oid::INT4, 4, -1, 0)]);
        script.extend(msg::data_row(&[Some(&b"1"[..]), Some(&b"2"[..])]));
        script.extend(msg::command_complete("SELECT 1"));
        script.extend(msg::ready());
        script.extend(people());
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let err = exec(&mut conn, "SELECT 1").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));

        let result = exec(&mut conn, "SELECT id, name FROM people").await.unwrap();
        assert_eq!(result.rows().len(), 2);
    }

    #[cfg(feature = "verbose")]
    #[tokio::test]
    async fn span_exits_while_pending() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
        let (mut conn, _server) = test_util::connect(&[]).await;

        // server never answers
        let mut query = Box::pin(exec(&mut conn, "SELECT 1"));
        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), &mut query).await;
        assert!(pending.is_err());
        assert!(tracing::Span::current().is_none());
    }

    #[tokio::test]
    async fn empty_query() {
        let mut script = msg::empty_query();
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let result = exec(&mut conn, "").await.unwrap();
        assert_eq!(result.status(), ResultStatus::EmptyQuery);
        assert_eq!(result.rows_affected(), 0);
    }

    #[tokio::test]
    async fn extended_binary() {
        let mut script = msg::parse_bind_complete();
        script.extend(msg::row_description(&[("typlen", oid::INT2, 2, -1, 1)]));
        script.extend(msg::data_row(&[Some(&(-1i16).to_be_bytes()[..])]));
        script.extend(msg::command_complete("SELECT 1"));
        script.extend(msg::ready());
        let (mut conn, mut server) = test_util::connect(&script).await;

        let result = exec_params(&mut conn, "SELECT typlen FROM pg_type WHERE typname = $1", &["text"], PgFormat::Binary)
            .await
            .unwrap();
        let rows = result.decode_rows::<(i16,)>().unwrap();
        assert_eq!(rows, [(-1,)]);
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        let sent = test_util::skip_startup(&sent);
        let msgtypes = test_util::msgtypes(sent);
        assert_eq!(msgtypes, b"PBDES");
    }

    #[tokio::test]
    async fn extended_command() {
        let mut script = msg::parse_bind_complete();
        script.extend(msg::no_data());
        script.extend(msg::command_complete("INSERT 0 3"));
        script.extend(msg::ready());
        let (mut conn, _server) = test_util::connect(&script).await;

        let result = exec_params(&mut conn, "INSERT INTO t SELECT generate_series(1, $1::int)", &["3"], PgFormat::Text)
            .await
            .unwrap();
        assert_eq!(result.status(), ResultStatus::CommandOk);
        assert_eq!(result.rows_affected(), 3);
        assert!(result.fields().is_empty());
    }

    #[test]
    fn command_tags() {
        assert_eq!(rows_affected("INSERT 0 5"), 5);
        assert_eq!(rows_affected("UPDATE 3"), 3);
        assert_eq!(rows_affected("SELECT 50"), 50);
        assert_eq!(rows_affected("CREATE TABLE"), 0);
        assert_eq!(rows_affected(""), 0);
    }

    #[test]
    fn status_names() {
        assert_eq!(ResultStatus::EmptyQuery.to_string(), "PGRES_EMPTY_QUERY");
        assert_eq!(ResultStatus::CommandOk.to_string(), "PGRES_COMMAND_OK");
        assert_eq!(ResultStatus::TuplesOk.to_string(), "PGRES_TUPLES_OK");
    }
}
