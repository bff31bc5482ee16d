//! In-memory server for async tests.
use tokio::io::AsyncWriteExt;

use crate::{
    connection::{Config, Connection},
    net::Socket,
};

/// Client socket and the server end of an in-memory pipe.
pub fn pair() -> (Socket, tokio::io::DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (Socket::duplex(client), server)
}

/// Connection that completed startup, `script` is queued after the handshake.
pub async fn connect(script: &[u8]) -> (Connection, tokio::io::DuplexStream) {
    let (socket, mut server) = pair();
    server.write_all(&msg::handshake()).await.unwrap();
    server.write_all(script).await.unwrap();

    let config = Config::from_params_with(&[("user", "alice"), ("dbname", "shop")], |_| None).unwrap();
    let conn = Connection::with_socket(socket, config).await.unwrap();
    (conn, server)
}

/// Frontend bytes following the startup message.
pub fn skip_startup(sent: &[u8]) -> &[u8] {
    let len = u32::from_be_bytes(sent[..4].try_into().unwrap()) as usize;
    &sent[len..]
}

/// Consecutive frontend messages, as message type and body.
pub fn frames(mut sent: &[u8]) -> Vec<(u8, &[u8])> {
    let mut out = vec![];
    while sent.len() >= 5 {
        let len = u32::from_be_bytes(sent[1..5].try_into().unwrap()) as usize;
        out.push((sent[0], &sent[5..1 + len]));
        sent = &sent[1 + len..];
    }
    out
}

/// Message types of consecutive frontend messages.
pub fn msgtypes(sent: &[u8]) -> Vec<u8> {
    frames(sent).into_iter().map(|(msgtype, _)| msgtype).collect()
}

/// Encoded backend messages.
pub mod msg {
    use bytes::{BufMut, BytesMut};

    use crate::ext::BufMutExt;

    fn frame(msgtype: u8, body: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(msgtype);
        buf.put_u32(0);
        body(&mut buf);
        let len = (buf.len() - 1) as u32;
        buf[1..5].copy_from_slice(&len.to_be_bytes());
        buf.to_vec()
    }

    pub fn auth(code: u32, extra: &[u8]) -> Vec<u8> {
        frame(b'R', |buf| {
            buf.put_u32(code);
            buf.put_slice(extra);
        })
    }

    pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
        frame(b'S', |buf| {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        })
    }

    /// NegotiateProtocolVersion without unrecognized options.
    pub fn negotiate_protocol(minor: u32) -> Vec<u8> {
        frame(b'v', |buf| {
            buf.put_u32(minor);
            buf.put_u32(0);
        })
    }

    pub fn ready() -> Vec<u8> {
        frame(b'Z', |buf| buf.put_u8(b'I'))
    }

    /// AuthenticationOk, a parameter, key data and ReadyForQuery.
    pub fn handshake() -> Vec<u8> {
        let mut out = auth(0, &[]);
        out.extend(parameter_status("server_version", "17.0"));
        out.extend(frame(b'K', |buf| {
            buf.put_u32(42);
            buf.put_u32(7);
        }));
        out.extend(ready());
        out
    }

    fn diagnostic(msgtype: u8, severity: &str, code: &str, message: &str) -> Vec<u8> {
        frame(msgtype, |buf| {
            for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
                buf.put_u8(field);
                buf.put_nul_string(value);
            }
            buf.put_u8(b'\0');
        })
    }

    pub fn error(severity: &str, code: &str, message: &str) -> Vec<u8> {
        diagnostic(b'E', severity, code, message)
    }

    pub fn notice(message: &str) -> Vec<u8> {
        diagnostic(b'N', "NOTICE", "00000", message)
    }

    /// `(name, type_oid, type_size, type_modifier, format)`
    pub fn row_description(fields: &[(&str, u32, i16, i32, u16)]) -> Vec<u8> {
        frame(b'T', |buf| {
            buf.put_u16(fields.len() as u16);
            for &(name, oid, size, modifier, format) in fields {
                buf.put_nul_string(name);
                buf.put_u32(0);
                buf.put_i16(0);
                buf.put_u32(oid);
                buf.put_i16(size);
                buf.put_i32(modifier);
                buf.put_u16(format);
            }
        })
    }

    pub fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        frame(b'D', |buf| {
            buf.put_u16(values.len() as u16);
            for value in values {
                match value {
                    Some(value) => {
                        buf.put_i32(value.len() as i32);
                        buf.put_slice(value);
                    },
                    None => buf.put_i32(-1),
                }
            }
        })
    }

    pub fn command_complete(tag: &str) -> Vec<u8> {
        frame(b'C', |buf| buf.put_nul_string(tag))
    }

    pub fn empty_query() -> Vec<u8> {
        frame(b'I', |_| {})
    }

    /// ParseComplete and BindComplete.
    pub fn parse_bind_complete() -> Vec<u8> {
        let mut out = frame(b'1', |_| {});
        out.extend(frame(b'2', |_| {}));
        out
    }

    pub fn no_data() -> Vec<u8> {
        frame(b'n', |_| {})
    }
}
