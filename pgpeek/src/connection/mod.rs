//! Postgres connection.
use crate::{
    Result,
    common::{ByteStr, instrument},
    error::ErrorKind,
    postgres::{
        BackendMessage,
        backend::BackendKeyData,
        frontend::Terminate,
    },
    stream::PgStream,
};

mod config;
mod auth;
mod startup;

pub use config::{Config, ParseError};
pub use auth::{AuthError, UnsupportedAuth};
pub(crate) use config::Target;

/// A single authenticated connection to postgres.
#[derive(Debug)]
pub struct Connection {
    stream: PgStream,
    config: Config,
    params: Vec<(ByteStr, ByteStr)>,
    key_data: Option<BackendKeyData>,
}

impl Connection {
    /// Open a socket and perform the startup phase.
    ///
    /// When `connect_timeout` is set, it bounds the whole startup phase.
    pub async fn connect(config: &Config) -> Result<Connection> {
        let connect = async {
            let stream = PgStream::connect(config).await?;
            Self::handshake(stream, config.clone()).await
        };
        match config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(conn) => conn,
                Err(_) => Err(ErrorKind::Timeout.into()),
            },
            None => connect.await,
        }
    }

    #[cfg(test)]
    pub(crate) async fn with_socket(socket: crate::net::Socket, config: Config) -> Result<Connection> {
        Self::handshake(PgStream::new(socket), config).await
    }

    async fn handshake(mut stream: PgStream, config: Config) -> Result<Connection> {
        let response = instrument!(startup::startup(&mut stream, &config), "startup").await?;
        Ok(Self {
            stream,
            config,
            params: response.params,
            key_data: response.key_data,
        })
    }

    pub fn host(&self) -> &str {
        self.config.host()
    }

    pub fn port(&self) -> u16 {
        self.config.port()
    }

    pub fn dbname(&self) -> &str {
        self.config.dbname()
    }

    pub fn user(&self) -> &str {
        self.config.user()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run-time parameter reported by the server, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Backend process id, when the server sent one.
    pub fn backend_pid(&self) -> Option<u32> {
        self.key_data.as_ref().map(|e| e.process_id)
    }

    pub(crate) fn stream(&mut self) -> &mut PgStream {
        &mut self.stream
    }

    /// Discard messages until `ReadyForQuery`.
    ///
    /// Used after an error so the connection can run the next query.
    /// Server errors seen while draining are dropped, io errors are not.
    pub(crate) async fn ready(&mut self) -> Result<()> {
        loop {
            match self.stream.recv::<BackendMessage>().await {
                Ok(BackendMessage::ReadyForQuery(_)) => return Ok(()),
                Ok(BackendMessage::ParameterStatus(status)) => self.params.push((status.name, status.value)),
                Ok(_) => {},
                Err(err) if err.as_database().is_some() => {},
                Err(err) => return Err(err),
            }
        }
    }

    /// Send `Terminate` and close the socket.
    pub async fn close(mut self) -> Result<()> {
        self.stream.send(Terminate);
        self.stream.flush().await?;
        Ok(())
    }
}
