//! Password authentication.
//!
//! <https://www.postgresql.org/docs/current/sasl-authentication.html>
use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha256};

/// The only SASL mechanism supported, channel binding is not.
pub(crate) const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

const NONCE_LEN: usize = 24;

/// `"md5" + md5hex(md5hex(password + user) + salt)`
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = hex(&md5.finalize_reset());

    md5.update(inner.as_bytes());
    md5.update(salt);

    let mut output = String::with_capacity(35);
    output.push_str("md5");
    output.push_str(&hex(&md5.finalize()));
    output
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// SCRAM-SHA-256 client exchange.
///
/// 1. [`client_first`][Scram::client_first] goes in `SASLInitialResponse`
/// 2. [`client_final`][Scram::client_final] answers `AuthenticationSASLContinue`
/// 3. [`verify`][Scram::verify] checks `AuthenticationSASLFinal`
pub(crate) struct Scram {
    password: Vec<u8>,
    client_first_bare: String,
    nonce: String,
    server_signature: Option<[u8; 32]>,
}

impl Scram {
    /// Postgres ignores the SCRAM username in favor of the startup user, so it is sent empty.
    pub(crate) fn new(password: &str) -> Self {
        let mut rng = rand::rng();
        let nonce = (0..NONCE_LEN)
            .map(|_| {
                // printable, except ','
                let ch = rng.random_range(0x21u8..0x7f);
                if ch == b',' { '~' } else { ch as char }
            })
            .collect();
        Self::with_nonce("", password, nonce)
    }

    /// The password is normalized with SASLprep, the way the server stores it.
    /// A password SASLprep rejects is used as is, which the server also accepts.
    pub(crate) fn with_nonce(user: &str, password: &str, nonce: String) -> Self {
        let password = match stringprep::saslprep(password) {
            Ok(prepared) => prepared.into_owned().into_bytes(),
            Err(_) => password.as_bytes().to_vec(),
        };
        Self {
            password,
            client_first_bare: format!("n={user},r={nonce}"),
            nonce,
            server_signature: None,
        }
    }

    /// gs2 header without channel binding, followed by the bare message.
    pub(crate) fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    pub(crate) fn client_final(&mut self, server_first: &[u8]) -> Result<String, AuthError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| AuthError::Malformed("server first message is not utf8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iteration = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iteration = Some(value),
                _ => {}
            }
        }

        let nonce = nonce.ok_or(AuthError::Malformed("server nonce missing"))?;
        let salt = salt.ok_or(AuthError::Malformed("salt missing"))?;
        let iteration = iteration.ok_or(AuthError::Malformed("iteration count missing"))?;

        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(AuthError::NonceMismatch);
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|_| AuthError::Malformed("salt is not base64"))?;
        let iteration = iteration
            .parse::<u32>()
            .ok()
            .filter(|e| *e > 0)
            .ok_or(AuthError::Malformed("invalid iteration count"))?;

        let salted = hi(&self.password, &salt, iteration);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        // "biws" is base64 of the gs2 header "n,,"
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature) {
            *p ^= s;
        }

        let server_key = hmac(&salted, b"Server Key");
        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes()));

        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    pub(crate) fn verify(&self, server_final: &[u8]) -> Result<(), AuthError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| AuthError::Malformed("server final message is not utf8"))?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(AuthError::Server(error.into()));
        }

        let Some(verifier) = server_final.split(',').find_map(|e| e.strip_prefix("v=")) else {
            return Err(AuthError::Malformed("server signature missing"));
        };
        let verifier = STANDARD
            .decode(verifier)
            .map_err(|_| AuthError::Malformed("server signature is not base64"))?;

        match self.server_signature {
            Some(expected) if expected[..] == verifier[..] => Ok(()),
            Some(_) => Err(AuthError::SignatureMismatch),
            None => Err(AuthError::Malformed("server final message before server first message")),
        }
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PBKDF2 with HMAC-SHA-256, one block.
fn hi(password: &[u8], salt: &[u8], iteration: u32) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(password).expect("hmac accepts key of any size");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut prev: [u8; 32] = mac.finalize().into_bytes().into();
    let mut output = prev;

    for _ in 1..iteration {
        prev = hmac(password, &prev);
        for (o, p) in output.iter_mut().zip(prev) {
            *o ^= p;
        }
    }

    output
}

/// Authentication exchange failed.
pub enum AuthError {
    Malformed(&'static str),
    NonceMismatch,
    SignatureMismatch,
    /// Server reported `e=<message>`.
    Server(String),
}

impl std::error::Error for AuthError { }

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SCRAM authentication failed, ")?;
        match self {
            AuthError::Malformed(reason) => f.write_str(reason),
            AuthError::NonceMismatch => f.write_str("server nonce does not extend client nonce"),
            AuthError::SignatureMismatch => f.write_str("incorrect server signature"),
            AuthError::Server(msg) => write!(f, "server error: {msg}"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Server requested an authentication method that is not implemented.
pub struct UnsupportedAuth {
    method: &'static str,
}

impl UnsupportedAuth {
    pub(crate) fn new(method: &'static str) -> Self {
        Self { method }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication method \"{}\" not supported", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 section 3
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str =
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn scram_rfc7677() {
        let mut scram = Scram::with_nonce("user", "pencil", NONCE.into());
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        assert_eq!(scram.client_final(SERVER_FIRST.as_bytes()).unwrap(), CLIENT_FINAL);
        scram.verify(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn scram_rejects_bad_server() {
        let mut scram = Scram::with_nonce("user", "pencil", NONCE.into());
        assert!(matches!(
            scram.client_final(b"r=someoneelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096"),
            Err(AuthError::NonceMismatch),
        ));

        scram.client_final(SERVER_FIRST.as_bytes()).unwrap();
        assert!(matches!(
            scram.verify(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            Err(AuthError::SignatureMismatch),
        ));
        assert!(matches!(scram.verify(b"e=invalid-proof"), Err(AuthError::Server(_))));
    }

    #[test]
    fn scram_password_saslprep() {
        let proof = |password: &str| {
            let mut scram = Scram::with_nonce("user", password, NONCE.into());
            scram.client_final(SERVER_FIRST.as_bytes()).unwrap()
        };

        // soft hyphen maps to nothing, no-break space maps to space
        assert_eq!(proof("pen\u{AD}cil"), CLIENT_FINAL);
        assert_eq!(proof("pen\u{A0}cil"), proof("pen cil"));
        assert_ne!(proof("pen cil"), CLIENT_FINAL);

        // prohibited control character, sent unprepared
        assert_ne!(proof("pen\u{7}cil"), CLIENT_FINAL);
    }

    #[test]
    fn scram_random_nonce() {
        let scram = Scram::new("secret");
        let first = scram.client_first();
        let nonce = first.strip_prefix("n,,n=,r=").unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(!nonce.contains(','));
    }

    #[test]
    fn md5_shape() {
        let hashed = md5_password("postgres", "secret", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
        assert!(hashed[3..].bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(hashed, md5_password("postgres", "secret", [4, 3, 2, 1]));
    }
}
