//! Startup phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use super::{
    Config,
    auth::{self, SCRAM_SHA_256, Scram},
    UnsupportedAuth,
};
use crate::{
    Result,
    common::{ByteStr, verbose, warning},
    postgres::{
        BackendMessage, ProtocolError,
        backend::{Authentication, BackendKeyData, ParameterStatus},
        frontend::{PasswordMessage, SaslInitialResponse, SaslResponse, Startup},
    },
    stream::PgStream,
};

/// What the server reported before the first `ReadyForQuery`.
#[derive(Debug, Default)]
pub(crate) struct StartupResponse {
    pub(crate) params: Vec<(ByteStr, ByteStr)>,
    pub(crate) key_data: Option<BackendKeyData>,
}

pub(crate) async fn startup(stream: &mut PgStream, config: &Config) -> Result<StartupResponse> {
    let params = config.runtime_params();
    stream.send_startup(Startup {
        user: &config.user,
        database: Some(&config.dbname),
        params: &params,
    });
    stream.flush().await?;

    authenticate(stream, config).await?;

    let mut response = StartupResponse::default();

    // The server will then send ParameterStatus and BackendKeyData,
    // it is done when ReadyForQuery is received
    loop {
        match stream.recv::<BackendMessage>().await? {
            BackendMessage::ParameterStatus(ParameterStatus { name, value }) => {
                verbose!(%name, %value, "parameter status");
                response.params.push((name, value));
            },
            BackendMessage::BackendKeyData(key_data) => response.key_data = Some(key_data),
            #[cfg_attr(not(feature = "log"), allow(unused_variables))]
            BackendMessage::NegotiateProtocolVersion(version) => {
                warning!("server supports protocol 3.{} only", version.minor);
            },
            BackendMessage::ReadyForQuery(_) => break,
            other => {
                return Err(ProtocolError::unexpected_phase(other.msgtype(), "startup").into());
            },
        }
    }

    Ok(response)
}

async fn authenticate(stream: &mut PgStream, config: &Config) -> Result<()> {
    let mut scram = None;

    loop {
        let request = stream.recv::<Authentication>().await?;
        verbose!(method = request.method(), "authentication request");

        match request {
            Authentication::Ok => return Ok(()),
            Authentication::CleartextPassword => {
                stream.send(PasswordMessage { password: &config.password });
            },
            Authentication::MD5Password { salt } => {
                let password = auth::md5_password(&config.user, &config.password, salt);
                stream.send(PasswordMessage { password: &password });
            },
            Authentication::SASL { .. } => {
                if !request.sasl_mechanisms().any(|e| e == SCRAM_SHA_256.as_bytes()) {
                    return Err(UnsupportedAuth::new("SASL").into());
                }
                let client = Scram::new(&config.password);
                stream.send(SaslInitialResponse {
                    mechanism: SCRAM_SHA_256,
                    data: client.client_first().as_bytes(),
                });
                scram = Some(client);
            },
            Authentication::SASLContinue { data } => {
                let Some(client) = scram.as_mut() else {
                    return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "authentication").into());
                };
                let message = client.client_final(&data)?;
                stream.send(SaslResponse { data: message.as_bytes() });
            },
            Authentication::SASLFinal { data } => {
                let Some(client) = scram.as_ref() else {
                    return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "authentication").into());
                };
                client.verify(&data)?;
                // AuthenticationOk follows
                continue;
            },
            other => return Err(UnsupportedAuth::new(other.method()).into()),
        }

        stream.flush().await?;
    }
}
