//! Shared startup of the `pgexec`, `pgprobe` and `pgselect` tools.
//!
//! Every tool takes `[key=value ...] [--] operand...`, connects, prints a banner,
//! then works through its operands stopping at the first failure.
use std::{fmt::Display, process::ExitCode};

use pgpeek::{Config, Connection, ResultStatus, args::Args, postgres::PgFormat};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Bad connection option or missing operand.
pub const EXIT_USAGE: u8 = 1;

/// Connected tool, ready to process its operands.
pub struct Session {
    pub operands: Vec<String>,
    pub conn: Connection,
}

/// Load `.env` and install the `RUST_LOG` filtered subscriber.
pub fn init_logging() {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Classify the command line and connect.
///
/// On failure the diagnostic is already printed, the caller should exit with the returned code.
pub async fn start() -> Result<Session, ExitCode> {
    init_logging();

    let Args { params, operands } = Args::from_env();
    tracing::debug!(params = params.len(), operands = operands.len(), "arguments");

    let config = match Config::from_params(&params) {
        Ok(ok) => ok,
        Err(err) => {
            eprintln!("Connection Failed: {err}");
            return Err(ExitCode::from(EXIT_USAGE));
        },
    };

    let conn = match Connection::connect(&config).await {
        Ok(ok) => ok,
        Err(err) => {
            eprintln!("Connection Failed: {err}");
            return Err(ExitCode::from(err.exit_code()));
        },
    };

    println!("{}", banner(conn.host(), conn.port(), conn.dbname(), conn.user()));

    Ok(Session { operands, conn })
}

impl Session {
    /// Close the connection and turn `code` into the process exit code.
    pub async fn finish(self, code: u8) -> ExitCode {
        if let Err(err) = self.conn.close().await {
            tracing::warn!("failed to close connection: {err}");
        }
        ExitCode::from(code)
    }
}

pub fn banner(host: &str, port: u16, dbname: &str, user: &str) -> String {
    format!("Connected to {host}:{port} database {dbname} as {user}")
}

/// `pgexec`: run the first operand with the rest bound to `$1..$n`, returns the exit code.
pub async fn execute(conn: &mut Connection, operands: &[String]) -> u8 {
    let Some((sql, params)) = operands.split_first() else {
        eprintln!("No query string supplied");
        return EXIT_USAGE;
    };
    let params = params.iter().map(String::as_str).collect::<Vec<_>>();

    match pgpeek::exec_params(conn, sql, &params, PgFormat::Text).await {
        Ok(result) => {
            println!("Result: {}", result.status());
            if result.status() != ResultStatus::EmptyQuery {
                println!("{result}");
            }
            0
        },
        Err(err) => report(format_args!("Unable to Execute {sql}"), &err),
    }
}

/// Print `<context> : <error>` to stderr, returns the exit code.
pub fn report(context: impl Display, err: &pgpeek::Error) -> u8 {
    eprintln!("{context} : {err}");
    err.exit_code()
}

#[cfg(test)]
mod test {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Accept one connection, answer startup with trust, return every byte received.
    async fn trust_server() -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // AuthenticationOk, ReadyForQuery idle
            socket.write_all(b"R\0\0\0\x08\0\0\0\0Z\0\0\0\x05I").await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });
        (port, server)
    }

    #[test]
    fn banner_line() {
        assert_eq!(
            banner("localhost", 5432, "postgres", "postgres"),
            "Connected to localhost:5432 database postgres as postgres",
        );
        assert_eq!(
            banner("/var/run/postgresql", 5433, "shop", "alice"),
            "Connected to /var/run/postgresql:5433 database shop as alice",
        );
    }

    #[test]
    fn bad_option_is_usage_error() {
        let err = Config::from_params(&[("colour", "blue")]).unwrap_err();
        let err = pgpeek::Error::from(err);
        assert_eq!(err.exit_code(), EXIT_USAGE);
        assert!(err.to_string().starts_with("invalid connection option \"colour\""));
    }

    #[tokio::test]
    async fn execute_without_statement() {
        let (port, server) = trust_server().await;
        let port = port.to_string();
        let config = Config::from_params(&[
            ("host", "127.0.0.1"),
            ("port", port.as_str()),
            ("user", "alice"),
            ("dbname", "shop"),
            ("sslmode", "disable"),
        ])
        .unwrap();
        let mut conn = Connection::connect(&config).await.unwrap();

        assert_eq!(execute(&mut conn, &[]).await, EXIT_USAGE);
        conn.close().await.unwrap();

        let received = server.await.unwrap();
        let startup_len = u32::from_be_bytes(received[..4].try_into().unwrap()) as usize;
        // only Terminate follows the startup message
        assert_eq!(&received[startup_len..], b"X\0\0\0\x04");
    }
}
