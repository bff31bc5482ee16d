//! Postgres connection, type catalog and schema probing.
//!
//! Building blocks for small command line utilities:
//!
//! - [`args`], split `key=value` connection parameters from operands
//! - [`Connection`], startup and authentication over tcp or unix socket
//! - [`query`], simple and extended query execution
//! - [`TypeCache`], oid to type name lookup from a `pg_type` snapshot
//! - [`describe`], table schema and row paging
//!
//! ```no_run
//! # async fn app() -> pgpeek::Result<()> {
//! use pgpeek::{Config, Connection, TypeCache, args, describe};
//!
//! let args = args::classify(["host=localhost", "user=postgres", "pg_class"]);
//! let config = Config::from_params(&args.params)?;
//! let mut conn = Connection::connect(&config).await?;
//!
//! let cache = TypeCache::build(&mut conn).await.unwrap_or_default();
//! for table in &args.operands {
//!     println!("{}", describe::probe_table(&mut conn, &cache, table).await?);
//! }
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `log`, report server notices and degraded paths through the `log` crate
//! - `verbose`, trace protocol traffic through the `tracing` crate
pub mod common;
mod ext;
mod net;
mod stream;

pub mod postgres;

pub mod args;
pub mod connection;
pub mod row;
pub mod query;
pub mod catalog;
pub mod describe;

mod error;

#[cfg(test)]
mod test_util;

pub use connection::{Config, Connection};
pub use row::{Decode, DecodeError, FromRow, Row};
pub use query::{QueryResult, ResultStatus, exec, exec_params};
pub use catalog::{TypeCache, TypeCacheError, TypeDescriptor};
pub use error::{Error, ErrorKind, Result};
