use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    Result,
    common::verbose,
    connection::{Config, Target},
    net::Socket,
    postgres::{
        BackendProtocol, DatabaseError, FrontendProtocol, ProtocolError,
        backend::{ErrorResponse, NoticeResponse},
        frontend,
    },
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// msgtype + length
const HEADER: usize = 1 + 4;

/// Buffered connection to postgres.
///
/// Sending only writes into the buffer, [`PgStream::flush`] actually writes to the socket.
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgStream {
    pub async fn connect(config: &Config) -> Result<Self> {
        let socket = match config.target() {
            Target::Unix(path) => Socket::connect_socket(&path).await?,
            Target::Tcp(host, port) => Socket::connect_tcp(host, port).await?,
        };
        Ok(Self::new(socket))
    }

    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Buffer a frontend message.
    pub fn send<F: FrontendProtocol>(&mut self, msg: F) {
        verbose!(msgtype = %(F::MSGTYPE as char), "send");
        frontend::write(msg, &mut self.write_buf);
    }

    /// Buffer the startup message.
    pub fn send_startup(&mut self, msg: frontend::Startup) {
        msg.write(&mut self.write_buf);
    }

    /// Write all buffered messages to the socket.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.socket.write_all_buf(&mut self.write_buf).await?;
        self.socket.flush().await
    }

    /// Receive a backend message.
    ///
    /// `NoticeResponse` is logged and skipped, `ErrorResponse` is returned as [`Err`].
    pub async fn recv<B: BackendProtocol>(&mut self) -> Result<B> {
        loop {
            let (msgtype, body) = self.recv_frame().await?;
            verbose!(msgtype = %(msgtype as char), len = body.len(), "recv");

            match msgtype {
                ErrorResponse::MSGTYPE => {
                    let ErrorResponse { error } = ErrorResponse::decode(msgtype, body)?;
                    return Err(error.into());
                },
                NoticeResponse::MSGTYPE => {
                    let NoticeResponse { notice } = NoticeResponse::decode(msgtype, body)?;
                    log_notice(&notice);
                },
                _ => return Ok(B::decode(msgtype, body)?),
            }
        }
    }

    async fn recv_frame(&mut self) -> Result<(u8, bytes::Bytes)> {
        loop {
            if let Some(mut header) = self.read_buf.get(..HEADER) {
                let msgtype = header.get_u8();
                let len = header.get_i32();
                if len < 4 {
                    return Err(ProtocolError::malformed("message length below 4").into());
                }
                let len = len as usize;

                if self.read_buf.len() >= 1 + len {
                    self.read_buf.advance(HEADER);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    return Ok((msgtype, body));
                }

                self.read_buf.reserve(1 + len - self.read_buf.len());
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            if self.socket.read_buf(&mut self.read_buf).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection unexpectedly",
                )
                .into());
            }
        }
    }
}

#[cfg_attr(not(feature = "log"), allow(unused_variables))]
fn log_notice(notice: &DatabaseError) {
    #[cfg(feature = "log")]
    match notice.severity() {
        "WARNING" => log::warn!("{notice}"),
        _ => log::info!("{notice}"),
    }
}
